//! The process-wide portal context: configuration, cache, backend access,
//! session, zone directory and notifications, wired together once.

use std::{future::Future, sync::Arc, time::Duration};

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::{ConfigError, PortalConfig};
use crate::domain::{
    admin_overview, customer_overview, pricing, AdminOverview, BookingForm, CheckoutSession,
    CreatedParcel, CustomerOverview, DeliveryStatus, NewParcel, Parcel, ParcelDraft, ParcelKind,
    Payment, PaymentReceipt, Quote, UserProfile, UserRole,
};
use crate::error::PortalError;
use crate::infra::{
    keys, session::SessionHook, ApiClient, HttpTransport, IdentityProvider, Mutation, QueryClient,
    QueryHandle, QueryKey, QueryOptions, ReqwestTransport, Session, ZoneDirectory, ZoneError,
};
use crate::notify::{Notifications, ToastKind};
use crate::util::persistence::{self, PersistError};

const PROFILE_STALE: Duration = Duration::from_secs(5 * 60);
const ADMIN_CHECK_STALE: Duration = Duration::from_secs(10 * 60);
const USER_LIST_STALE: Duration = Duration::from_secs(2 * 60);
const PHONE_SEARCH_MIN_DIGITS: usize = 11;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Zones(#[from] ZoneError),
    #[error("failed to build HTTP client: {0}")]
    Transport(#[from] PortalError),
}

pub struct Portal {
    config: PortalConfig,
    queries: QueryClient,
    api: ApiClient,
    session: Arc<Session>,
    zones: ZoneDirectory,
    notifications: Notifications,
}

impl Portal {
    /// Build a portal talking to the configured backend over HTTP.
    pub fn new(
        config: PortalConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, StartupError> {
        let transport = ReqwestTransport::new(config.api_base_url()?, config.request_timeout)?;
        Self::with_transport(config, identity, Arc::new(transport))
    }

    pub fn with_transport(
        config: PortalConfig,
        identity: Arc<dyn IdentityProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, StartupError> {
        let zones = ZoneDirectory::load(config.warehouses_path.as_deref())?;
        let queries = QueryClient::new(config.query_config());
        let notifications = Notifications::new();
        let session = Arc::new(Session::new(identity));

        // A forced sign-out drops everything cached for the previous user.
        session.on_sign_out({
            let queries = queries.clone();
            let notifications = notifications.clone();
            Arc::new(move || {
                queries.clear();
                notifications.push(
                    ToastKind::Warning,
                    "Your session has expired. Please sign in again.",
                );
            })
        });

        let api = ApiClient::new(transport, session.clone());
        tracing::info!(api = %config.api_url, regions = zones.regions().len(), "portal ready");

        Ok(Self {
            config,
            queries,
            api,
            session,
            zones,
            notifications,
        })
    }

    /// Start following identity changes. Must run inside a Tokio runtime.
    pub fn init(&self) {
        self.session.init();
    }

    /// Stop following identity changes.
    pub fn teardown(&self) {
        self.session.teardown();
    }

    /// Called after a forced sign-out; typically navigates to the login screen.
    pub fn on_sign_out(&self, hook: SessionHook) {
        self.session.on_sign_out(hook);
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn zones(&self) -> &ZoneDirectory {
        &self.zones
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    /// Price a shipment between two districts.
    pub fn quote(
        &self,
        kind: ParcelKind,
        weight: Option<Decimal>,
        origin_district: &str,
        destination_district: &str,
    ) -> Result<Quote, PortalError> {
        let same_zone = self.zones.same_zone(origin_district, destination_district);
        Ok(pricing::quote(kind, weight, same_zone)?)
    }

    fn query<T, F, Fut>(&self, key: QueryKey, options: QueryOptions, fetch: F) -> QueryHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn(ApiClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
    {
        let api = self.api.clone();
        self.queries.subscribe(key, move || fetch(api.clone()), options)
    }

    /// Parcels sent by `email`. Idle until an email is known.
    pub fn user_parcels(&self, email: Option<&str>) -> QueryHandle<Vec<Parcel>> {
        let email = present(email);
        self.query(
            keys::parcels::user(&email),
            QueryOptions::enabled(!email.is_empty()),
            move |api| {
                let email = email.clone();
                async move { api.user_parcels(&email).await }
            },
        )
    }

    /// The subset of [`Portal::user_parcels`] still awaiting payment.
    pub fn unpaid_parcels(&self, email: Option<&str>) -> QueryHandle<Vec<Parcel>> {
        let email = present(email);
        self.query(
            keys::parcels::unpaid(&email),
            QueryOptions::enabled(!email.is_empty()),
            move |api| {
                let email = email.clone();
                async move { api.unpaid_parcels(&email).await }
            },
        )
    }

    pub fn parcel_details(&self, id: Option<&str>) -> QueryHandle<Parcel> {
        let id = present(id);
        self.query(
            keys::parcels::detail(&id),
            QueryOptions::enabled(!id.is_empty()),
            move |api| {
                let id = id.clone();
                async move { api.parcel(&id).await }
            },
        )
    }

    /// Enabled once the phone number has at least 11 digits and an email is known.
    pub fn search_parcels(&self, phone: &str, email: Option<&str>) -> QueryHandle<Vec<Parcel>> {
        let phone = phone.trim().to_string();
        let email = present(email);
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        let enabled = digits >= PHONE_SEARCH_MIN_DIGITS && !email.is_empty();
        self.query(
            keys::parcels::search(&phone, &email),
            QueryOptions::enabled(enabled),
            move |api| {
                let (phone, email) = (phone.clone(), email.clone());
                async move { api.search_by_phone(&phone, &email).await }
            },
        )
    }

    /// Public lookup by tracking code; no session needed.
    pub fn track_parcel(&self, tracking_code: &str) -> QueryHandle<Parcel> {
        let code = tracking_code.trim().to_string();
        self.query(
            keys::parcels::track(&code),
            QueryOptions::enabled(!code.is_empty()),
            move |api| {
                let code = code.clone();
                async move { api.track(&code).await }
            },
        )
    }

    /// Every parcel in the system. Admin only.
    pub fn all_parcels(&self) -> QueryHandle<Vec<Parcel>> {
        self.query(
            keys::parcels::admin_list(),
            QueryOptions::default(),
            |api| async move { api.all_parcels().await },
        )
    }

    pub fn payment_history(&self, email: Option<&str>) -> QueryHandle<Vec<Payment>> {
        let email = present(email);
        self.query(
            keys::payments::user(&email),
            QueryOptions::enabled(!email.is_empty()).with_stale_time(PROFILE_STALE),
            move |api| {
                let email = email.clone();
                async move { api.user_payments(&email).await }
            },
        )
    }

    /// Retried once; a missing profile usually means sign-up has not finished.
    pub fn user_profile(&self, email: Option<&str>) -> QueryHandle<UserProfile> {
        let email = present(email);
        self.query(
            keys::users::by_email(&email),
            QueryOptions::enabled(!email.is_empty())
                .with_stale_time(PROFILE_STALE)
                .with_retry(1),
            move |api| {
                let email = email.clone();
                async move { api.user(&email).await }
            },
        )
    }

    pub fn is_admin(&self, email: Option<&str>) -> QueryHandle<bool> {
        let email = present(email);
        self.query(
            keys::users::admin_check(&email),
            QueryOptions::enabled(!email.is_empty()).with_stale_time(ADMIN_CHECK_STALE),
            move |api| {
                let email = email.clone();
                async move { api.check_admin(&email).await }
            },
        )
    }

    /// Admin user list.
    pub fn all_users(&self) -> QueryHandle<Vec<UserProfile>> {
        self.query(
            keys::users::all(),
            QueryOptions::default().with_stale_time(USER_LIST_STALE),
            |api| async move { api.all_users().await },
        )
    }

    /// Raw counters from the admin stats endpoint.
    pub fn user_stats(&self) -> QueryHandle<Value> {
        self.query(
            keys::users::stats(),
            QueryOptions::default().with_stale_time(PROFILE_STALE),
            |api| async move { api.user_stats().await },
        )
    }

    async fn run_mutation<T, Fut>(
        &self,
        mutation: Mutation,
        op: Fut,
        success: impl FnOnce(&T) -> String,
    ) -> Result<T, PortalError>
    where
        Fut: Future<Output = Result<T, PortalError>>,
    {
        let result = self.queries.mutate(&mutation, op).await;
        match &result {
            Ok(value) => {
                self.notifications.success(success(value));
            }
            Err(err) => {
                self.notifications
                    .error(format!("Failed to {}: {err}", mutation.label));
            }
        }
        result
    }

    /// Post a parcel and refresh the sender's lists. Most callers want
    /// [`Portal::submit_booking`], which also drives the form.
    pub async fn create_parcel(&self, parcel: &NewParcel) -> Result<CreatedParcel, PortalError> {
        let mutation = Mutation::new("create parcel")
            .invalidating(keys::parcels::user(&parcel.sender_email))
            .invalidating(keys::parcels::unpaid(&parcel.sender_email));
        self.run_mutation(mutation, self.api.create_parcel(parcel), |_| {
            "Parcel created successfully!".to_string()
        })
        .await
    }

    pub async fn delete_parcel(&self, id: &str, owner_email: &str) -> Result<(), PortalError> {
        let mutation = Mutation::new("delete parcel")
            .invalidating(keys::parcels::user(owner_email))
            .invalidating(keys::parcels::unpaid(owner_email));
        self.run_mutation(mutation, self.api.delete_parcel(id), |message| {
            message
                .clone()
                .unwrap_or_else(|| "Parcel deleted successfully!".to_string())
        })
        .await
        .map(|_| ())
    }

    /// Admin action. Refreshes every parcel list since any of them may show it.
    pub async fn update_parcel_status(
        &self,
        id: &str,
        status: &DeliveryStatus,
    ) -> Result<(), PortalError> {
        let mutation = Mutation::new("update parcel status").invalidating(keys::parcels::all());
        self.run_mutation(mutation, self.api.update_parcel_status(id, status), |message| {
            message
                .clone()
                .unwrap_or_else(|| format!("Parcel marked {status}"))
        })
        .await
        .map(|_| ())
    }

    /// Open a hosted checkout for an unpaid parcel. Returns the redirect URL.
    pub async fn create_checkout_session(
        &self,
        parcel: &Parcel,
    ) -> Result<CheckoutSession, PortalError> {
        if parcel.is_paid() {
            let err = PortalError::InvalidInput(format!("parcel {} is already paid", parcel.id));
            self.notifications
                .error(format!("Failed to create checkout session: {err}"));
            return Err(err);
        }
        let mutation = Mutation::new("create checkout session");
        self.run_mutation(
            mutation,
            self.api
                .create_checkout_session(&parcel.id, parcel.cost, &parcel.name),
            |_| "Redirecting to checkout".to_string(),
        )
        .await
    }

    /// Confirm a completed checkout. The backend assigns the tracking code here.
    pub async fn verify_payment(
        &self,
        session_id: &str,
        parcel_id: &str,
    ) -> Result<PaymentReceipt, PortalError> {
        let mutation = Mutation::new("verify payment")
            .invalidating(keys::parcels::all())
            .invalidating(keys::payments::all());
        self.run_mutation(mutation, self.api.verify_payment(session_id, parcel_id), |_| {
            "Payment successful!".to_string()
        })
        .await
    }

    /// Register a newly signed-up user. Works without a session.
    pub async fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<UserProfile, PortalError> {
        let mutation = Mutation::new("create user")
            .invalidating(keys::users::all())
            .invalidating(keys::users::by_email(email));
        self.run_mutation(
            mutation,
            self.api.create_user(email, display_name, photo_url),
            |user| format!("Welcome, {}", user.display_name.as_deref().unwrap_or(&user.email)),
        )
        .await
    }

    pub async fn update_user_role(&self, email: &str, role: &UserRole) -> Result<(), PortalError> {
        let mutation = Mutation::new("update user role")
            .invalidating(keys::users::all())
            .invalidating(keys::users::by_email(email));
        self.run_mutation(mutation, self.api.update_user_role(email, role), |message| {
            message
                .clone()
                .unwrap_or_else(|| format!("{email} is now {}", role.as_str()))
        })
        .await
        .map(|_| ())
    }

    pub async fn update_user_status(&self, email: &str, status: &str) -> Result<(), PortalError> {
        let mutation = Mutation::new("update user status")
            .invalidating(keys::users::all())
            .invalidating(keys::users::by_email(email));
        self.run_mutation(mutation, self.api.update_user_status(email, status), |message| {
            message
                .clone()
                .unwrap_or_else(|| format!("{email} is now {status}"))
        })
        .await
        .map(|_| ())
    }

    pub async fn delete_user(&self, email: &str) -> Result<(), PortalError> {
        let mutation = Mutation::new("delete user").invalidating(keys::users::all());
        self.run_mutation(mutation, self.api.delete_user(email), |message| {
            message
                .clone()
                .unwrap_or_else(|| format!("Deleted {email}"))
        })
        .await
        .map(|_| ())
    }

    /// Confirm a reviewed booking for the signed-in user and post it.
    ///
    /// Once posted, the form ends in `Succeeded` or `Failed` and a failure keeps
    /// the draft. Without a signed-in user nothing is sent and the form stays
    /// in `Reviewing`.
    pub async fn submit_booking(
        &self,
        form: &mut BookingForm,
    ) -> Result<CreatedParcel, PortalError> {
        let prepared = self
            .session
            .email()
            .ok_or(PortalError::Auth { status: 401 })
            .and_then(|email| Ok(form.begin_submit(&email)?));
        let parcel = match prepared {
            Ok(parcel) => parcel,
            Err(err) => {
                self.notifications
                    .error(format!("Failed to create parcel: {err}"));
                return Err(err);
            }
        };
        tracing::info!(cost = %parcel.cost, kind = %parcel.draft.kind, "submitting booking");

        let result = self.create_parcel(&parcel).await;
        form.complete(result.clone());
        result
    }

    /// Keep an unfinished booking on disk across restarts.
    pub fn save_draft(&self, draft: &ParcelDraft) -> Result<(), PersistError> {
        let path = persistence::draft_file().ok_or(PersistError::StorageUnavailable)?;
        persistence::save_draft(&path, draft)
    }

    pub fn load_draft(&self) -> Result<Option<ParcelDraft>, PersistError> {
        let path = persistence::draft_file().ok_or(PersistError::StorageUnavailable)?;
        persistence::load_draft(&path)
    }

    /// Dashboard figures for one customer, computed from fresh or cached lists.
    pub async fn customer_overview(&self, email: &str) -> Result<CustomerOverview, PortalError> {
        let mut parcels = self.user_parcels(Some(email));
        let mut payments = self.payment_history(Some(email));
        let parcels = parcels.settled().await?;
        let payments = payments.settled().await?;
        Ok(customer_overview(&parcels, &payments, OffsetDateTime::now_utc()))
    }

    pub async fn admin_overview(&self) -> Result<AdminOverview, PortalError> {
        let parcels = self.all_parcels().settled().await?;
        Ok(admin_overview(&parcels, OffsetDateTime::now_utc()))
    }
}

fn present(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::domain::{booking::tests::filled_draft, BookingPhase};
    use crate::infra::query::QueryStatus;
    use crate::infra::session::{AuthUser, StaticTokenProvider};
    use crate::infra::transport::fake::ScriptedTransport;

    const EMAIL: &str = "rahim@example.com";

    fn portal(transport: Arc<ScriptedTransport>) -> Portal {
        let provider = Arc::new(StaticTokenProvider::new(
            Some(AuthUser {
                email: EMAIL.into(),
                display_name: Some("Rahim".into()),
            }),
            Some("token".into()),
        ));
        Portal::with_transport(PortalConfig::default(), provider, transport).expect("portal")
    }

    #[tokio::test]
    async fn user_queries_wait_for_an_email() {
        let transport = Arc::new(ScriptedTransport::default());
        let portal = portal(transport.clone());

        let handle = portal.user_parcels(None);
        assert_eq!(handle.state().status, QueryStatus::Idle);
        let search = portal.search_parcels("0171", Some(EMAIL));
        assert_eq!(search.state().status, QueryStatus::Idle);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn booking_posts_the_quoted_cost_and_refreshes_the_list() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            Method::GET,
            "/parcels/user/rahim@example.com",
            200,
            json!({ "parcels": [] }),
        );
        transport.respond(
            Method::POST,
            "/parcels",
            201,
            json!({ "success": true, "insertedId": "p-1", "message": "Parcel created" }),
        );
        let portal = portal(transport.clone());

        let mut parcels = portal.user_parcels(Some(EMAIL));
        assert!(parcels.settled().await.expect("list").is_empty());

        let mut form = BookingForm::new(filled_draft());
        assert_eq!(form.estimate(), Some(&Ok(Decimal::from(150))));
        form.review().expect("review");

        let created = portal.submit_booking(&mut form).await.expect("created");
        assert_eq!(created.id.as_deref(), Some("p-1"));
        assert_eq!(form.phase(), BookingPhase::Succeeded);

        let post = transport
            .sent()
            .into_iter()
            .find(|r| r.method == Method::POST)
            .expect("post sent");
        let body = post.body.expect("body");
        assert_eq!(body["cost"], json!(150.0));
        assert_eq!(body["senderEmail"], json!(EMAIL));

        parcels.settled().await.expect("refetched");
        assert_eq!(transport.count(&Method::GET, "/parcels/user/rahim@example.com"), 2);

        let toasts = portal.notifications().list();
        assert_eq!(toasts.last().map(|t| t.kind), Some(ToastKind::Success));
    }

    #[tokio::test]
    async fn failed_write_notifies_and_keeps_the_draft() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            Method::POST,
            "/parcels",
            400,
            json!({ "message": "Receiver district is not served" }),
        );
        let portal = portal(transport);

        let mut form = BookingForm::new(filled_draft());
        form.review().expect("review");
        let err = portal.submit_booking(&mut form).await.expect_err("rejected");

        assert_eq!(err.to_string(), "Receiver district is not served");
        assert_eq!(form.phase(), BookingPhase::Failed);
        assert_eq!(form.draft(), &filled_draft());
        let toasts = portal.notifications().list();
        assert_eq!(
            toasts.last().map(|t| t.text.as_str()),
            Some("Failed to create parcel: Receiver district is not served")
        );
    }

    #[tokio::test]
    async fn booking_without_a_session_notifies_and_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::default());
        let portal = Portal::with_transport(
            PortalConfig::default(),
            Arc::new(StaticTokenProvider::anonymous()),
            transport.clone(),
        )
        .expect("portal");

        let mut form = BookingForm::new(filled_draft());
        form.review().expect("review");
        let err = portal.submit_booking(&mut form).await.expect_err("signed out");

        assert_eq!(err, PortalError::Auth { status: 401 });
        assert_eq!(form.phase(), BookingPhase::Reviewing);
        assert!(transport.sent().is_empty());
        let toasts = portal.notifications().list();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Error);
        assert!(toasts[0].text.starts_with("Failed to create parcel: "));
    }

    #[tokio::test]
    async fn submitting_an_unreviewed_form_is_reported() {
        let transport = Arc::new(ScriptedTransport::default());
        let portal = portal(transport.clone());

        // Never reviewed, so the form is still editing.
        let mut form = BookingForm::new(filled_draft());
        let err = portal.submit_booking(&mut form).await.expect_err("not reviewed");

        assert!(matches!(err, PortalError::InvalidInput(_)));
        assert_eq!(form.phase(), BookingPhase::Editing);
        assert!(transport.sent().is_empty());
        assert_eq!(
            portal.notifications().list().last().map(|t| t.kind),
            Some(ToastKind::Error)
        );
    }

    #[tokio::test]
    async fn forced_sign_out_clears_cached_data() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            Method::GET,
            "/payments/user/rahim@example.com",
            200,
            json!({ "payments": [] }),
        );
        transport.respond(Method::GET, "/parcels", 401, json!({ "message": "expired" }));
        let portal = portal(transport);

        let mut history = portal.payment_history(Some(EMAIL));
        history.settled().await.expect("payments");

        let err = portal.all_parcels().settled().await.expect_err("unauthorized");
        assert!(err.is_auth());
        assert!(history.state().data.is_none());
        assert!(portal
            .notifications()
            .list()
            .iter()
            .any(|t| t.kind == ToastKind::Warning));
    }

    #[tokio::test]
    async fn paid_parcels_cannot_be_checked_out() {
        let transport = Arc::new(ScriptedTransport::default());
        let portal = portal(transport.clone());
        let parcel = Parcel {
            id: "p-1".into(),
            name: "Books".into(),
            kind: ParcelKind::Document,
            weight: None,
            sender_name: "Rahim".into(),
            sender_email: Some(EMAIL.into()),
            sender_phone: None,
            sender_region: None,
            sender_district: None,
            sender_address: None,
            pickup_instruction: None,
            receiver_name: "Karim".into(),
            receiver_phone: None,
            receiver_region: None,
            receiver_district: None,
            receiver_address: None,
            delivery_instruction: None,
            cost: Decimal::from(60),
            payment_status: crate::domain::PaymentStatus::Paid,
            delivery_status: DeliveryStatus::InTransit,
            tracking_code: None,
            notes: None,
            created_at: None,
            updated_at: None,
        };
        let err = portal
            .create_checkout_session(&parcel)
            .await
            .expect_err("already paid");
        assert!(matches!(err, PortalError::InvalidInput(_)));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn quote_uses_the_zone_directory() {
        let portal = portal(Arc::new(ScriptedTransport::default()));
        let quote = portal
            .quote(ParcelKind::Document, None, "Dhaka", "Sylhet")
            .expect("quote");
        assert_eq!(quote.total, Decimal::from(80));
    }
}
