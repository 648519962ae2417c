use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Server-assigned parcel identifier.
pub type ParcelId = String;

/// Parcel category; decides which pricing tier applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParcelKind {
    #[default]
    Document,
    NonDocument,
}

impl ParcelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelKind::Document => "document",
            ParcelKind::NonDocument => "non-document",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "document" => Some(ParcelKind::Document),
            "non-document" | "non_document" | "nondocument" => Some(ParcelKind::NonDocument),
            _ => None,
        }
    }
}

impl fmt::Display for ParcelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the delivery charge has been settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// Delivery progress as reported by the backend.
///
/// The client only ever reflects this value; it is changed by admin actions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    ReadyToPickup,
    InTransit,
    ReachedServiceCenter,
    Shipped,
    ReadyForDelivery,
    OutForDelivery,
    Delivered,
    Damaged,
    Delayed,
    /// Value this client does not know about, kept verbatim.
    Other(String),
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::ReadyToPickup => "ready-to-pickup",
            DeliveryStatus::InTransit => "in-transit",
            DeliveryStatus::ReachedServiceCenter => "reached-service-center",
            DeliveryStatus::Shipped => "shipped",
            DeliveryStatus::ReadyForDelivery => "ready-for-delivery",
            DeliveryStatus::OutForDelivery => "out-for-delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Damaged => "damaged",
            DeliveryStatus::Delayed => "delayed",
            DeliveryStatus::Other(raw) => raw.as_str(),
        }
    }

    /// Exceptional states raised as shipment alerts.
    pub fn is_exception(&self) -> bool {
        matches!(self, DeliveryStatus::Damaged | DeliveryStatus::Delayed)
    }
}

impl From<&str> for DeliveryStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "pending" => DeliveryStatus::Pending,
            "ready-to-pickup" => DeliveryStatus::ReadyToPickup,
            "in-transit" => DeliveryStatus::InTransit,
            "reached-service-center" => DeliveryStatus::ReachedServiceCenter,
            "shipped" => DeliveryStatus::Shipped,
            "ready-for-delivery" => DeliveryStatus::ReadyForDelivery,
            "out-for-delivery" => DeliveryStatus::OutForDelivery,
            "delivered" => DeliveryStatus::Delivered,
            "damaged" => DeliveryStatus::Damaged,
            "delayed" => DeliveryStatus::Delayed,
            other => DeliveryStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for DeliveryStatus {
    fn from(raw: String) -> Self {
        DeliveryStatus::from(raw.as_str())
    }
}

impl From<DeliveryStatus> for String {
    fn from(status: DeliveryStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted shipment as returned by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Parcel {
    pub id: ParcelId,
    pub name: String,
    pub kind: ParcelKind,
    pub weight: Option<Decimal>,
    pub sender_name: String,
    pub sender_email: Option<String>,
    pub sender_phone: Option<String>,
    pub sender_region: Option<String>,
    pub sender_district: Option<String>,
    pub sender_address: Option<String>,
    pub pickup_instruction: Option<String>,
    pub receiver_name: String,
    pub receiver_phone: Option<String>,
    pub receiver_region: Option<String>,
    pub receiver_district: Option<String>,
    pub receiver_address: Option<String>,
    pub delivery_instruction: Option<String>,
    pub cost: Decimal,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,
    pub tracking_code: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

impl Parcel {
    /// Paid parcels cannot be sent to checkout again.
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Most recent activity timestamp, falling back to creation.
    pub fn last_activity(&self) -> Option<OffsetDateTime> {
        self.updated_at.or(self.created_at)
    }
}

/// How a payment was made.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Card payment through the hosted checkout.
    #[default]
    Stripe,
    Cash,
}

/// A settled payment from the user's payment history.
#[derive(Clone, Debug, PartialEq)]
pub struct Payment {
    pub id: String,
    pub parcel_id: Option<ParcelId>,
    pub parcel_name: String,
    /// Amount charged, in taka.
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub tracking_number: Option<String>,
    /// Processor reference; absent for cash payments.
    pub transaction_id: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

/// Account role. Unknown roles round-trip unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Rider,
    Other(String),
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::Rider => "rider",
            UserRole::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for UserRole {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "user" => UserRole::User,
            "admin" => UserRole::Admin,
            "rider" => UserRole::Rider,
            _ => UserRole::Other(raw),
        }
    }
}

impl From<UserRole> for String {
    fn from(role: UserRole) -> Self {
        role.as_str().to_string()
    }
}

/// Account record kept by the backend alongside the identity provider's user.
#[derive(Clone, Debug, PartialEq)]
pub struct UserProfile {
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub role: UserRole,
    /// Free-form account status such as `active` or `suspended`.
    pub status: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// One row of the static warehouse list used to populate region/district pickers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub region: String,
    pub district: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub covered_area: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Warehouse {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

/// Result of `POST /parcels`.
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedParcel {
    pub id: Option<ParcelId>,
    pub message: Option<String>,
}

/// Opaque hand-off to the hosted checkout page.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckoutSession {
    pub session_id: Option<String>,
    pub url: String,
}

/// Result of a successful payment verification.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentReceipt {
    pub tracking_code: Option<String>,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
}
