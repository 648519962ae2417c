//! Send-a-parcel form: draft fields, validation and the review/submit lifecycle.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entities::{CreatedParcel, ParcelId, ParcelKind};
use super::pricing::{quote, same_zone, Cost, PricingError, Quote};
use crate::error::PortalError;

const MIN_NAME_LEN: usize = 3;
const MIN_ADDRESS_LEN: usize = 5;
const MIN_INSTRUCTION_LEN: usize = 10;
const PHONE_DIGITS: usize = 11;

/// Unsubmitted parcel as typed into the form. Field names follow the backend's
/// camelCase document so the draft can be posted as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelDraft {
    #[serde(rename = "type")]
    pub kind: ParcelKind,
    pub parcel_name: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub weight: Option<Decimal>,
    pub sender_name: String,
    pub sender_phone: String,
    pub sender_region: String,
    pub sender_district: String,
    pub sender_address: String,
    pub pickup_instruction: String,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_region: String,
    pub receiver_district: String,
    pub receiver_address: String,
    pub delivery_instruction: String,
}

impl ParcelDraft {
    pub fn new(kind: ParcelKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// True once both ends have a district, the precondition for a live estimate.
    pub fn has_route(&self) -> bool {
        !self.sender_district.trim().is_empty() && !self.receiver_district.trim().is_empty()
    }

    pub fn is_same_zone(&self) -> bool {
        same_zone(&self.sender_district, &self.receiver_district)
    }

    pub fn set_sender_region(&mut self, region: impl Into<String>) {
        self.sender_region = region.into();
        self.sender_district.clear();
    }

    pub fn set_receiver_region(&mut self, region: impl Into<String>) {
        self.receiver_region = region.into();
        self.receiver_district.clear();
    }

    pub fn quote(&self) -> Result<Quote, PricingError> {
        quote(self.kind, self.weight, self.is_same_zone())
    }

    /// Field-level checks run before the review step.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        min_len(&mut errors, "parcelName", &self.parcel_name, MIN_NAME_LEN);
        if self.kind == ParcelKind::NonDocument {
            match self.weight {
                None => errors.push(FieldError::new("weight", "Weight is required")),
                Some(weight) if weight < Decimal::new(1, 1) => {
                    errors.push(FieldError::new("weight", "Weight must be at least 0.1 kg"))
                }
                Some(_) => {}
            }
        }

        min_len(&mut errors, "senderName", &self.sender_name, MIN_NAME_LEN);
        phone(&mut errors, "senderPhone", &self.sender_phone);
        required(&mut errors, "senderRegion", &self.sender_region);
        required(&mut errors, "senderDistrict", &self.sender_district);
        min_len(&mut errors, "senderAddress", &self.sender_address, MIN_ADDRESS_LEN);
        min_len(
            &mut errors,
            "pickupInstruction",
            &self.pickup_instruction,
            MIN_INSTRUCTION_LEN,
        );

        min_len(&mut errors, "receiverName", &self.receiver_name, MIN_NAME_LEN);
        phone(&mut errors, "receiverPhone", &self.receiver_phone);
        required(&mut errors, "receiverRegion", &self.receiver_region);
        required(&mut errors, "receiverDistrict", &self.receiver_district);
        min_len(&mut errors, "receiverAddress", &self.receiver_address, MIN_ADDRESS_LEN);
        min_len(
            &mut errors,
            "deliveryInstruction",
            &self.delivery_instruction,
            MIN_INSTRUCTION_LEN,
        );

        errors
    }
}

fn required(errors: &mut Vec<FieldError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "This field is required"));
    }
}

fn min_len(errors: &mut Vec<FieldError>, field: &'static str, value: &str, min: usize) {
    let len = value.trim().chars().count();
    if len == 0 {
        errors.push(FieldError::new(field, "This field is required"));
    } else if len < min {
        errors.push(FieldError::new(
            field,
            format!("Must be at least {min} characters"),
        ));
    }
}

fn phone(errors: &mut Vec<FieldError>, field: &'static str, value: &str) {
    let value = value.trim();
    if value.len() != PHONE_DIGITS || !value.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new(field, "Phone number must be exactly 11 digits"));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Body of `POST /parcels`: the draft plus the computed cost and the sender's account.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParcel {
    #[serde(flatten)]
    pub draft: ParcelDraft,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Cost,
    pub sender_email: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingPhase {
    Editing,
    Reviewing,
    Submitting,
    Succeeded,
    Failed,
}

impl fmt::Display for BookingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingPhase::Editing => "editing",
            BookingPhase::Reviewing => "reviewing",
            BookingPhase::Submitting => "submitting",
            BookingPhase::Succeeded => "succeeded",
            BookingPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum BookingError {
    #[error("form has invalid fields: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        phase: BookingPhase,
        action: &'static str,
    },
    #[error("sender email is required to submit a parcel")]
    MissingSender,
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.field)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<BookingError> for PortalError {
    fn from(err: BookingError) -> Self {
        PortalError::InvalidInput(err.to_string())
    }
}

impl From<PricingError> for PortalError {
    fn from(err: PricingError) -> Self {
        PortalError::InvalidInput(err.to_string())
    }
}

/// Drives one booking from first keystroke to a persisted parcel.
///
/// `editing → reviewing → submitting → succeeded | failed`; a failed submission
/// keeps the draft and goes back to editing on the next edit.
#[derive(Clone, Debug)]
pub struct BookingForm {
    draft: ParcelDraft,
    phase: BookingPhase,
    estimate: Option<Result<Cost, PricingError>>,
    quote: Option<Quote>,
    last_error: Option<PortalError>,
    created: Option<ParcelId>,
}

impl Default for BookingForm {
    fn default() -> Self {
        Self::new(ParcelDraft::default())
    }
}

impl BookingForm {
    pub fn new(draft: ParcelDraft) -> Self {
        let mut form = Self {
            draft,
            phase: BookingPhase::Editing,
            estimate: None,
            quote: None,
            last_error: None,
            created: None,
        };
        form.recompute();
        form
    }

    pub fn draft(&self) -> &ParcelDraft {
        &self.draft
    }

    pub fn phase(&self) -> BookingPhase {
        self.phase
    }

    /// Live estimate; `None` until both districts are chosen.
    pub fn estimate(&self) -> Option<&Result<Cost, PricingError>> {
        self.estimate.as_ref()
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    pub fn last_error(&self) -> Option<&PortalError> {
        self.last_error.as_ref()
    }

    pub fn created_parcel(&self) -> Option<&str> {
        self.created.as_deref()
    }

    /// Apply an edit and refresh the estimate. Allowed while editing or after a failure.
    pub fn edit(&mut self, change: impl FnOnce(&mut ParcelDraft)) -> Result<(), BookingError> {
        match self.phase {
            BookingPhase::Editing => {}
            BookingPhase::Failed => {
                self.phase = BookingPhase::Editing;
            }
            phase => {
                return Err(BookingError::InvalidTransition {
                    phase,
                    action: "edit",
                })
            }
        }
        change(&mut self.draft);
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.estimate = if self.draft.has_route() {
            Some(self.draft.quote().map(|quote| quote.total))
        } else {
            None
        };
    }

    /// Validate the draft and open the confirmation step with an itemised quote.
    pub fn review(&mut self) -> Result<&Quote, BookingError> {
        if !matches!(self.phase, BookingPhase::Editing | BookingPhase::Failed) {
            return Err(BookingError::InvalidTransition {
                phase: self.phase,
                action: "review",
            });
        }
        let errors = self.draft.validate();
        if !errors.is_empty() {
            return Err(BookingError::Invalid(errors));
        }
        let quote = self.draft.quote()?;
        self.phase = BookingPhase::Reviewing;
        Ok(self.quote.insert(quote))
    }

    /// Close the confirmation step without submitting.
    pub fn back_to_editing(&mut self) -> Result<(), BookingError> {
        if self.phase != BookingPhase::Reviewing {
            return Err(BookingError::InvalidTransition {
                phase: self.phase,
                action: "return to editing",
            });
        }
        self.phase = BookingPhase::Editing;
        self.quote = None;
        Ok(())
    }

    /// Confirm the reviewed quote and produce the request body.
    pub fn begin_submit(&mut self, sender_email: &str) -> Result<NewParcel, BookingError> {
        if self.phase != BookingPhase::Reviewing {
            return Err(BookingError::InvalidTransition {
                phase: self.phase,
                action: "submit",
            });
        }
        let sender_email = sender_email.trim();
        if sender_email.is_empty() {
            return Err(BookingError::MissingSender);
        }
        let cost = match &self.quote {
            Some(quote) => quote.total,
            None => self.draft.quote()?.total,
        };
        self.phase = BookingPhase::Submitting;
        self.last_error = None;
        Ok(NewParcel {
            draft: self.draft.clone(),
            cost,
            sender_email: sender_email.to_string(),
        })
    }

    /// Record the outcome of the submission.
    pub fn complete(&mut self, outcome: Result<CreatedParcel, PortalError>) {
        if self.phase != BookingPhase::Submitting {
            return;
        }
        match outcome {
            Ok(created) => {
                self.phase = BookingPhase::Succeeded;
                self.created = created.id;
            }
            Err(err) => {
                self.phase = BookingPhase::Failed;
                self.last_error = Some(err);
            }
        }
    }

    /// Start a fresh form after a successful booking, keeping the sender's details.
    pub fn reset_for_next(&mut self) {
        let sender = ParcelDraft {
            sender_name: self.draft.sender_name.clone(),
            sender_phone: self.draft.sender_phone.clone(),
            sender_region: self.draft.sender_region.clone(),
            sender_district: self.draft.sender_district.clone(),
            sender_address: self.draft.sender_address.clone(),
            ..ParcelDraft::default()
        };
        *self = Self::new(sender);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn filled_draft() -> ParcelDraft {
        ParcelDraft {
            kind: ParcelKind::NonDocument,
            parcel_name: "Winter jackets".into(),
            weight: Some(Decimal::from(4)),
            sender_name: "Rahim Uddin".into(),
            sender_phone: "01711000000".into(),
            sender_region: "Dhaka".into(),
            sender_district: "Dhaka".into(),
            sender_address: "House 12, Road 5, Dhanmondi".into(),
            pickup_instruction: "Call before arriving please".into(),
            receiver_name: "Karim Ahmed".into(),
            receiver_phone: "01811000000".into(),
            receiver_region: "Dhaka".into(),
            receiver_district: "Dhaka".into(),
            receiver_address: "Flat 3B, Mirpur 10".into(),
            delivery_instruction: "Leave with the building guard".into(),
        }
    }

    #[test]
    fn estimate_waits_for_both_districts() {
        let mut form = BookingForm::new(ParcelDraft::new(ParcelKind::Document));
        assert!(form.estimate().is_none());

        form.edit(|d| d.sender_district = "Dhaka".into()).expect("edit");
        assert!(form.estimate().is_none());

        form.edit(|d| d.receiver_district = "Dhaka".into()).expect("edit");
        assert_eq!(form.estimate(), Some(&Ok(Decimal::from(60))));

        form.edit(|d| d.receiver_district = "Sylhet".into()).expect("edit");
        assert_eq!(form.estimate(), Some(&Ok(Decimal::from(80))));
    }

    #[test]
    fn estimate_tracks_kind_and_weight() {
        let mut form = BookingForm::new(filled_draft());
        assert_eq!(form.estimate(), Some(&Ok(Decimal::from(150))));

        form.edit(|d| d.weight = None).expect("edit");
        assert_eq!(form.estimate(), Some(&Err(PricingError::MissingWeight)));

        form.edit(|d| d.kind = ParcelKind::Document).expect("edit");
        assert_eq!(form.estimate(), Some(&Ok(Decimal::from(60))));
    }

    #[test]
    fn changing_region_resets_district() {
        let mut draft = filled_draft();
        draft.set_receiver_region("Chattogram");
        assert!(draft.receiver_district.is_empty());
        assert!(!draft.has_route());
    }

    #[test]
    fn review_blocks_invalid_fields() {
        let mut draft = filled_draft();
        draft.sender_phone = "12345".into();
        draft.pickup_instruction = "short".into();
        let mut form = BookingForm::new(draft);

        let err = form.review().expect_err("invalid");
        let BookingError::Invalid(fields) = err else {
            panic!("expected field errors");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["senderPhone", "pickupInstruction"]);
        assert_eq!(form.phase(), BookingPhase::Editing);
    }

    #[test]
    fn documents_do_not_need_weight() {
        let mut draft = filled_draft();
        draft.kind = ParcelKind::Document;
        draft.weight = None;
        assert!(draft.validate().is_empty());
    }

    #[test]
    fn failed_submission_keeps_draft_and_returns_to_editing() {
        let mut form = BookingForm::new(filled_draft());
        form.review().expect("review");
        let body = form.begin_submit("rahim@example.com").expect("submit");
        assert_eq!(body.cost, Decimal::from(150));
        assert_eq!(form.phase(), BookingPhase::Submitting);

        form.complete(Err(PortalError::Network("offline".into())));
        assert_eq!(form.phase(), BookingPhase::Failed);
        assert_eq!(form.draft(), &filled_draft());

        form.edit(|d| d.parcel_name = "Winter coats".into()).expect("edit");
        assert_eq!(form.phase(), BookingPhase::Editing);
    }

    #[test]
    fn submit_requires_review_and_sender() {
        let mut form = BookingForm::new(filled_draft());
        assert!(matches!(
            form.begin_submit("a@b.c"),
            Err(BookingError::InvalidTransition { action: "submit", .. })
        ));
        form.review().expect("review");
        assert_eq!(form.begin_submit("  "), Err(BookingError::MissingSender));
        assert!(form.edit(|d| d.parcel_name.clear()).is_err());
    }

    #[test]
    fn success_records_created_parcel() {
        let mut form = BookingForm::new(filled_draft());
        form.review().expect("review");
        form.begin_submit("rahim@example.com").expect("submit");
        form.complete(Ok(CreatedParcel {
            id: Some("p-1".into()),
            message: None,
        }));
        assert_eq!(form.phase(), BookingPhase::Succeeded);
        assert_eq!(form.created_parcel(), Some("p-1"));

        form.reset_for_next();
        assert_eq!(form.phase(), BookingPhase::Editing);
        assert_eq!(form.draft().sender_name, "Rahim Uddin");
        assert!(form.draft().parcel_name.is_empty());
    }

    #[test]
    fn new_parcel_serialises_as_backend_document() {
        let body = NewParcel {
            draft: filled_draft(),
            cost: Decimal::from(150),
            sender_email: "rahim@example.com".into(),
        };
        let json = serde_json::to_value(&body).expect("json");
        assert_eq!(json["type"], "non-document");
        assert_eq!(json["parcelName"], "Winter jackets");
        assert_eq!(json["weight"], 4.0);
        assert_eq!(json["cost"], 150.0);
        assert_eq!(json["senderEmail"], "rahim@example.com");
        assert_eq!(json["receiverDistrict"], "Dhaka");
    }
}
