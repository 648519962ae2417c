//! Pure portal logic: entities, pricing, the booking flow and dashboard figures.

pub mod booking;
pub mod entities;
pub mod pricing;
pub mod stats;
pub mod status;

pub use booking::{BookingError, BookingForm, BookingPhase, FieldError, NewParcel, ParcelDraft};
pub use entities::{
    CheckoutSession, CreatedParcel, DeliveryStatus, Parcel, ParcelId, ParcelKind, Payment,
    PaymentMethod, PaymentReceipt, PaymentStatus, UserProfile, UserRole, Warehouse,
};
pub use pricing::{compute_cost, display_amount, quote, same_zone, Cost, PricingError, Quote};
pub use stats::{
    admin_overview, customer_overview, filter_parcels, search_payments, AdminOverview,
    CustomerOverview, PaymentSort, StatusFilter,
};
pub use status::{badge, parcel_badge, Badge, StatusTag, Tone};
