use std::sync::{Arc, Mutex};

use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use parcel_portal::domain::{BookingForm, BookingPhase, ParcelDraft, ParcelKind};
use parcel_portal::infra::transport::BoxFuture;
use parcel_portal::infra::{
    ApiRequest, ApiResponse, AuthUser, HttpTransport, StaticTokenProvider,
};
use parcel_portal::notify::ToastKind;
use parcel_portal::{Portal, PortalConfig, PortalError};

const EMAIL: &str = "nadia@example.com";

/// Answers from a fixed route table and records every request.
#[derive(Default)]
struct Backend {
    routes: Mutex<Vec<(Method, String, u16, Value)>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl Backend {
    fn route(&self, method: Method, path: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .push((method, path.to_string(), status, body));
    }

    fn hits(&self, method: &Method, path: &str) -> Vec<ApiRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.method == method && r.path() == path)
            .cloned()
            .collect()
    }
}

impl HttpTransport for Backend {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, PortalError>> {
        let response = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(method, path, _, _)| *method == request.method && *path == request.path())
            .map(|(_, _, status, body)| ApiResponse {
                status: *status,
                body: body.to_string(),
            })
            .unwrap_or(ApiResponse {
                status: 404,
                body: r#"{"message":"Not found"}"#.into(),
            });
        self.log.lock().unwrap().push(request);
        Box::pin(async move { Ok(response) })
    }
}

fn signed_in(backend: Arc<Backend>) -> (Portal, Arc<StaticTokenProvider>) {
    let provider = Arc::new(StaticTokenProvider::new(
        Some(AuthUser {
            email: EMAIL.into(),
            display_name: Some("Nadia".into()),
        }),
        Some("id-token".into()),
    ));
    let portal = Portal::with_transport(PortalConfig::default(), provider.clone(), backend)
        .expect("portal");
    (portal, provider)
}

fn draft() -> ParcelDraft {
    let mut draft = ParcelDraft::new(ParcelKind::NonDocument);
    draft.parcel_name = "Winter jackets".into();
    draft.weight = Some(Decimal::from(4));
    draft.sender_name = "Nadia Islam".into();
    draft.sender_phone = "01811000000".into();
    draft.set_sender_region("Dhaka");
    draft.sender_district = "Dhaka".into();
    draft.sender_address = "House 12, Road 4, Dhanmondi".into();
    draft.pickup_instruction = "Call before arriving at the gate".into();
    draft.receiver_name = "Farhan Ahmed".into();
    draft.receiver_phone = "01911000000".into();
    draft.set_receiver_region("Dhaka");
    draft.receiver_district = "Dhaka".into();
    draft.receiver_address = "Flat 3B, Banani Road 11".into();
    draft.delivery_instruction = "Leave with the building guard".into();
    draft
}

#[tokio::test]
async fn booking_a_parcel_refreshes_my_parcels() {
    let backend = Arc::new(Backend::default());
    backend.route(
        Method::GET,
        "/parcels/user/nadia@example.com",
        200,
        json!({ "success": true, "parcels": [] }),
    );
    backend.route(
        Method::POST,
        "/parcels",
        201,
        json!({ "success": true, "insertedId": { "$oid": "6710c0ffee" } }),
    );
    let (portal, _) = signed_in(backend.clone());

    let mut mine = portal.user_parcels(Some(EMAIL));
    assert!(mine.settled().await.expect("initial list").is_empty());

    let mut form = BookingForm::new(draft());
    assert_eq!(form.estimate(), Some(&Ok(Decimal::from(150))));
    let quote = form.review().expect("review").clone();
    assert_eq!(quote.total, Decimal::from(150));

    let created = portal.submit_booking(&mut form).await.expect("booked");
    assert_eq!(created.id.as_deref(), Some("6710c0ffee"));
    assert_eq!(form.phase(), BookingPhase::Succeeded);

    let posts = backend.hits(&Method::POST, "/parcels");
    assert_eq!(posts.len(), 1);
    let body = posts[0].body.clone().expect("body");
    assert_eq!(body["cost"], json!(150.0));
    assert_eq!(body["senderEmail"], json!(EMAIL));
    assert_eq!(posts[0].bearer.as_deref(), Some("id-token"));

    mine.settled().await.expect("refetched list");
    assert_eq!(
        backend.hits(&Method::GET, "/parcels/user/nadia@example.com").len(),
        2
    );
    let toasts = portal.notifications().list();
    assert!(toasts.iter().any(|t| t.kind == ToastKind::Success));
}

#[tokio::test]
async fn rejected_credentials_sign_out_once() {
    let backend = Arc::new(Backend::default());
    backend.route(Method::GET, "/parcels", 401, json!({ "message": "Token expired" }));
    let (portal, provider) = signed_in(backend.clone());

    let err = portal.all_parcels().settled().await.expect_err("401");
    assert!(err.is_auth());
    assert_eq!(provider.sign_out_count(), 1);
    assert!(portal.session().is_revoked());

    // Later protected calls fail without reaching the backend.
    let before = backend.hits(&Method::GET, "/parcels").len();
    let err = portal.api().all_parcels().await.expect_err("fail fast");
    assert_eq!(err, PortalError::Auth { status: 401 });
    assert_eq!(backend.hits(&Method::GET, "/parcels").len(), before);
    assert_eq!(provider.sign_out_count(), 1);
}

#[tokio::test]
async fn tracking_works_without_signing_in() {
    let backend = Arc::new(Backend::default());
    backend.route(
        Method::GET,
        "/parcels/track/TRK-1",
        200,
        json!({ "parcel": {
            "_id": "p-9",
            "parcelName": "Letters",
            "type": "document",
            "senderName": "Nadia",
            "receiverName": "Farhan",
            "cost": "80",
            "status": "in-transit",
            "trackingCode": "TRK-1"
        } }),
    );
    let portal = Portal::with_transport(
        PortalConfig::default(),
        Arc::new(StaticTokenProvider::anonymous()),
        backend.clone(),
    )
    .expect("portal");

    let parcel = portal.track_parcel("TRK-1").settled().await.expect("tracked");
    assert_eq!(parcel.id, "p-9");
    assert!(parcel.is_paid());
    assert!(backend.hits(&Method::GET, "/parcels/track/TRK-1")[0]
        .bearer
        .is_none());
}
