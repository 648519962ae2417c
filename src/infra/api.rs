//! Typed access to the portal REST backend.
//!
//! - Attaches a fresh bearer token to protected endpoints and routes 401/403
//!   through the [`Session`].
//! - Tolerates the backend's loose document shapes: `{ parcels: [...] }`
//!   envelopes or bare lists, numbers sent as strings, Mongo-style `_id`s.

use std::{str::FromStr, sync::Arc};

use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::domain::{
    CheckoutSession, CreatedParcel, DeliveryStatus, NewParcel, Parcel, ParcelKind, Payment,
    PaymentMethod, PaymentReceipt, PaymentStatus, UserProfile, UserRole,
};
use crate::error::PortalError;
use crate::infra::session::Session;
use crate::infra::transport::{ApiRequest, HttpTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Public,
    Protected,
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, session: Arc<Session>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn user_parcels(&self, email: &str) -> Result<Vec<Parcel>, PortalError> {
        let path = ["parcels", "user", email];
        let value = self.get(ApiRequest::get(path)).await?;
        parse_list::<ParcelDto, _>(value, "parcels")
    }

    pub async fn unpaid_parcels(&self, email: &str) -> Result<Vec<Parcel>, PortalError> {
        let path = ["parcels", "user", email, "unpaid"];
        let value = self.get(ApiRequest::get(path)).await?;
        parse_list::<ParcelDto, _>(value, "parcels")
    }

    pub async fn parcel(&self, id: &str) -> Result<Parcel, PortalError> {
        let value = self
            .get(ApiRequest::get(["parcels", id]))
            .await?;
        parse_one::<ParcelDto, _>(value, "parcel")
    }

    pub async fn create_parcel(&self, parcel: &NewParcel) -> Result<CreatedParcel, PortalError> {
        let body = serde_json::to_value(parcel)?;
        let value = self
            .send_json(ApiRequest::post(["parcels"], body), Access::Protected)
            .await?;
        Ok(CreatedParcel {
            id: ["insertedId", "parcelId", "id", "_id"]
                .iter()
                .find_map(|field| value.get(*field).cloned().and_then(id_value))
                .or_else(|| {
                    value
                        .get("parcel")
                        .and_then(|parcel| parcel.get("_id").or_else(|| parcel.get("id")))
                        .cloned()
                        .and_then(id_value)
                }),
            message: message_of(&value),
        })
    }

    pub async fn update_parcel_status(
        &self,
        id: &str,
        status: &DeliveryStatus,
    ) -> Result<Option<String>, PortalError> {
        let path = ["parcels", id, "status"];
        let value = self
            .send_json(
                ApiRequest::patch(path, json!({ "status": status.as_str() })),
                Access::Protected,
            )
            .await?;
        Ok(message_of(&value))
    }

    pub async fn delete_parcel(&self, id: &str) -> Result<Option<String>, PortalError> {
        let path = ["parcels", id];
        let value = self
            .send_json(ApiRequest::delete(path), Access::Protected)
            .await?;
        Ok(message_of(&value))
    }

    /// Public tracking lookup; no credentials required.
    pub async fn track(&self, tracking_code: &str) -> Result<Parcel, PortalError> {
        let path = ["parcels", "track", tracking_code];
        let value = self
            .send_json(ApiRequest::get(path), Access::Public)
            .await?;
        parse_one::<ParcelDto, _>(value, "parcel")
    }

    pub async fn search_by_phone(
        &self,
        phone: &str,
        email: &str,
    ) -> Result<Vec<Parcel>, PortalError> {
        let path = ["parcels", "search", "phone", phone];
        let value = self
            .get(ApiRequest::get(path).with_query("email", email))
            .await?;
        parse_list::<ParcelDto, _>(value, "parcels")
    }

    pub async fn all_parcels(&self) -> Result<Vec<Parcel>, PortalError> {
        let value = self.get(ApiRequest::get(["parcels"])).await?;
        parse_list::<ParcelDto, _>(value, "parcels")
    }

    pub async fn create_checkout_session(
        &self,
        parcel_id: &str,
        amount: Decimal,
        parcel_name: &str,
    ) -> Result<CheckoutSession, PortalError> {
        let body = json!({
            "parcelId": parcel_id,
            "amount": amount,
            "parcelName": parcel_name,
        });
        let value = self
            .send_json(
                ApiRequest::post(["create-checkout-session"], body),
                Access::Protected,
            )
            .await?;
        let url = value
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| PortalError::Decode("checkout response missing `url`".into()))?;
        Ok(CheckoutSession {
            session_id: ["sessionId", "id"]
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
                .map(str::to_string),
            url: url.to_string(),
        })
    }

    pub async fn verify_payment(
        &self,
        session_id: &str,
        parcel_id: &str,
    ) -> Result<PaymentReceipt, PortalError> {
        let body = json!({ "sessionId": session_id, "parcelId": parcel_id });
        let value = self
            .send_json(ApiRequest::post(["verify-payment"], body), Access::Protected)
            .await?;
        let text = |fields: &[&str]| {
            fields
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
                .map(str::to_string)
        };
        Ok(PaymentReceipt {
            tracking_code: text(&["tracking_no", "trackingNumber", "trackingCode"]),
            transaction_id: text(&["transactionId", "stripeTransactionId"]),
            message: message_of(&value),
        })
    }

    pub async fn user_payments(&self, email: &str) -> Result<Vec<Payment>, PortalError> {
        let path = ["payments", "user", email];
        let value = self.get(ApiRequest::get(path)).await?;
        parse_list::<PaymentDto, _>(value, "payments")
    }

    /// Register a freshly signed-up user. Public endpoint.
    pub async fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<UserProfile, PortalError> {
        let body = json!({
            "email": email,
            "displayName": display_name,
            "photoURL": photo_url,
        });
        let value = self
            .send_json(ApiRequest::post(["users"], body), Access::Public)
            .await?;
        parse_one::<UserDto, _>(value, "user")
    }

    pub async fn user(&self, email: &str) -> Result<UserProfile, PortalError> {
        let value = self
            .get(ApiRequest::get(["users", email]))
            .await?;
        parse_one::<UserDto, _>(value, "user")
    }

    pub async fn check_admin(&self, email: &str) -> Result<bool, PortalError> {
        let path = ["users", email, "check-admin"];
        let value = self.get(ApiRequest::get(path)).await?;
        ["isAdmin", "admin"]
            .iter()
            .find_map(|field| value.get(*field).and_then(Value::as_bool))
            .or_else(|| {
                value
                    .get("role")
                    .and_then(Value::as_str)
                    .map(|role| role == "admin")
            })
            .ok_or_else(|| PortalError::Decode("admin check response missing `isAdmin`".into()))
    }

    pub async fn all_users(&self) -> Result<Vec<UserProfile>, PortalError> {
        let value = self.get(ApiRequest::get(["admin", "users"])).await?;
        parse_list::<UserDto, _>(value, "users")
    }

    pub async fn update_user_role(
        &self,
        email: &str,
        role: &UserRole,
    ) -> Result<Option<String>, PortalError> {
        let path = ["users", email, "role"];
        let value = self
            .send_json(
                ApiRequest::patch(path, json!({ "role": role.as_str() })),
                Access::Protected,
            )
            .await?;
        Ok(message_of(&value))
    }

    pub async fn update_user_status(
        &self,
        email: &str,
        status: &str,
    ) -> Result<Option<String>, PortalError> {
        let path = ["users", email, "status"];
        let value = self
            .send_json(
                ApiRequest::patch(path, json!({ "status": status })),
                Access::Protected,
            )
            .await?;
        Ok(message_of(&value))
    }

    pub async fn delete_user(&self, email: &str) -> Result<Option<String>, PortalError> {
        let path = ["users", email];
        let value = self
            .send_json(ApiRequest::delete(path), Access::Protected)
            .await?;
        Ok(message_of(&value))
    }

    /// Aggregate figures for the admin dashboard, passed through untyped.
    pub async fn user_stats(&self) -> Result<Value, PortalError> {
        self.get(ApiRequest::get(["users", "stats", "overview"])).await
    }

    async fn get(&self, request: ApiRequest) -> Result<Value, PortalError> {
        self.send_json(request, Access::Protected).await
    }

    async fn send_json(&self, mut request: ApiRequest, access: Access) -> Result<Value, PortalError> {
        if access == Access::Protected {
            let token = self.session.bearer().await?;
            request = request.with_bearer(token);
        }

        let request_id = request.request_id;
        let method = request.method.clone();
        let path = request.path();
        let response = self.transport.execute(request).await?;

        if !response.is_success() {
            let error = PortalError::from_status(response.status, &response.body);
            tracing::warn!(%request_id, %method, %path, status = response.status, error = %error, "request rejected");
            if access == Access::Protected && error.is_auth() {
                self.session.handle_unauthorized(response.status).await;
            }
            return Err(error);
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&response.body)?;

        // The backend sometimes reports failures as 200 + `success: false`.
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let message = message_of(&value).unwrap_or_else(|| format!("{method} {path} failed"));
            return Err(PortalError::Validation {
                status: response.status,
                message,
            });
        }
        Ok(value)
    }
}

fn message_of(value: &Value) -> Option<String> {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_list<D, T>(value: Value, field: &str) -> Result<Vec<T>, PortalError>
where
    D: DeserializeOwned,
    T: From<D>,
{
    let items = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove(field)
            .or_else(|| map.remove("data"))
            .ok_or_else(|| PortalError::Decode(format!("response missing `{field}`")))?,
        other => {
            return Err(PortalError::Decode(format!(
                "expected a list of {field}, got {other}"
            )))
        }
    };
    let dtos: Vec<D> = serde_json::from_value(items)?;
    Ok(dtos.into_iter().map(T::from).collect())
}

fn parse_one<D, T>(value: Value, field: &str) -> Result<T, PortalError>
where
    D: DeserializeOwned,
    T: From<D>,
{
    let item = match value {
        Value::Object(mut map) if map.get(field).map(Value::is_object).unwrap_or(false) => {
            map.remove(field).unwrap_or(Value::Null)
        }
        other => other,
    };
    let dto: D = serde_json::from_value(item)?;
    Ok(T::from(dto))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParcelDto {
    #[serde(alias = "_id", deserialize_with = "id_from_json")]
    id: String,
    #[serde(default, alias = "name")]
    parcel_name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "decimal_from_json")]
    weight: Option<Decimal>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    sender_email: Option<String>,
    #[serde(default)]
    sender_phone: Option<String>,
    #[serde(default)]
    sender_region: Option<String>,
    #[serde(default)]
    sender_district: Option<String>,
    #[serde(default)]
    sender_address: Option<String>,
    #[serde(default)]
    pickup_instruction: Option<String>,
    #[serde(default)]
    receiver_name: Option<String>,
    #[serde(default)]
    receiver_phone: Option<String>,
    #[serde(default)]
    receiver_region: Option<String>,
    #[serde(default)]
    receiver_district: Option<String>,
    #[serde(default)]
    receiver_address: Option<String>,
    #[serde(default)]
    delivery_instruction: Option<String>,
    #[serde(default, deserialize_with = "decimal_from_json")]
    cost: Option<Decimal>,
    /// Older documents carry a single status for both payment and delivery.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    delivery_status: Option<String>,
    #[serde(default, alias = "tracking_no", alias = "trackingNumber")]
    tracking_code: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    created_at: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    updated_at: Option<OffsetDateTime>,
}

impl From<ParcelDto> for Parcel {
    fn from(dto: ParcelDto) -> Self {
        let (payment_status, delivery_status) = split_status(
            dto.status.as_deref(),
            dto.payment_status.as_deref(),
            dto.delivery_status,
        );
        Self {
            id: dto.id,
            name: dto.parcel_name.unwrap_or_default(),
            kind: dto
                .kind
                .as_deref()
                .and_then(ParcelKind::parse)
                .unwrap_or_default(),
            weight: dto.weight,
            sender_name: dto.sender_name.unwrap_or_default(),
            sender_email: dto.sender_email,
            sender_phone: dto.sender_phone,
            sender_region: dto.sender_region,
            sender_district: dto.sender_district,
            sender_address: dto.sender_address,
            pickup_instruction: dto.pickup_instruction,
            receiver_name: dto.receiver_name.unwrap_or_default(),
            receiver_phone: dto.receiver_phone,
            receiver_region: dto.receiver_region,
            receiver_district: dto.receiver_district,
            receiver_address: dto.receiver_address,
            delivery_instruction: dto.delivery_instruction,
            cost: dto.cost.unwrap_or_default(),
            payment_status,
            delivery_status,
            tracking_code: dto.tracking_code,
            notes: dto.notes,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        }
    }
}

/// Map the legacy single `status` onto payment and delivery status. Explicit
/// `paymentStatus`/`deliveryStatus` fields always win. A legacy delivery value
/// implies the parcel was paid for.
fn split_status(
    legacy: Option<&str>,
    payment: Option<&str>,
    delivery: Option<String>,
) -> (PaymentStatus, DeliveryStatus) {
    let payment = payment.and_then(PaymentStatus::parse);
    let delivery = delivery.map(DeliveryStatus::from);

    match legacy.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => match PaymentStatus::parse(raw) {
            Some(legacy_payment) => (
                payment.unwrap_or(legacy_payment),
                delivery.unwrap_or_default(),
            ),
            None => (
                payment.unwrap_or(PaymentStatus::Paid),
                delivery.unwrap_or_else(|| DeliveryStatus::from(raw)),
            ),
        },
        None => (payment.unwrap_or_default(), delivery.unwrap_or_default()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentDto {
    #[serde(alias = "_id", deserialize_with = "id_from_json")]
    id: String,
    #[serde(default, deserialize_with = "opt_id_from_json")]
    parcel_id: Option<String>,
    #[serde(default)]
    parcel_name: Option<String>,
    #[serde(default, deserialize_with = "decimal_from_json")]
    amount: Option<Decimal>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default, alias = "tracking_no")]
    tracking_number: Option<String>,
    #[serde(default, alias = "stripeTransactionId")]
    transaction_id: Option<String>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    created_at: Option<OffsetDateTime>,
}

impl From<PaymentDto> for Payment {
    fn from(dto: PaymentDto) -> Self {
        Self {
            id: dto.id,
            parcel_id: dto.parcel_id,
            parcel_name: dto.parcel_name.unwrap_or_default(),
            amount: dto.amount.unwrap_or_default(),
            method: match dto.payment_method.as_deref() {
                Some(method) if method.eq_ignore_ascii_case("cash") => PaymentMethod::Cash,
                _ => PaymentMethod::Stripe,
            },
            tracking_number: dto.tracking_number,
            transaction_id: dto.transaction_id,
            created_at: dto.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    email: String,
    #[serde(default, alias = "name")]
    display_name: Option<String>,
    #[serde(default, alias = "photoURL")]
    photo_url: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    created_at: Option<OffsetDateTime>,
}

impl From<UserDto> for UserProfile {
    fn from(dto: UserDto) -> Self {
        Self {
            email: dto.email,
            display_name: dto.display_name,
            photo_url: dto.photo_url,
            role: dto.role.map(UserRole::from).unwrap_or_default(),
            status: dto.status,
            created_at: dto.created_at,
        }
    }
}

/// Accept a string, a number or a Mongo `{ "$oid": ... }` wrapper.
fn id_value(value: Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        Value::Object(mut map) => map.remove("$oid").and_then(id_value),
        _ => None,
    }
}

fn id_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_value(value).ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
}

fn opt_id_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_value(Value::deserialize(deserializer)?))
}

fn decimal_from_json<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DecimalOrString;

    impl<'de> serde::de::Visitor<'de> for DecimalOrString {
        type Value = Option<Decimal>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            Decimal::from_str(trimmed)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid decimal `{trimmed}`: {err}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(Decimal::from(value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(Decimal::from(value)))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            // Shortest round-trip text keeps 4.5 as 4.5 rather than its binary expansion.
            self.visit_str(&value.to_string())
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(DecimalOrString)
}

/// RFC 3339 strings, epoch milliseconds or `{ "$date": ... }`. Anything
/// unparseable is treated as missing.
fn timestamp_from_json<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(timestamp_value(Value::deserialize(deserializer)?))
}

fn timestamp_value(value: Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(raw) => OffsetDateTime::parse(raw.trim(), &Rfc3339).ok(),
        Value::Number(millis) => millis.as_i64().and_then(|millis| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
        }),
        Value::Object(mut map) => map.remove("$date").and_then(timestamp_value),
        _ => None,
    }
}
