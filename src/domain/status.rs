//! Status → badge lookup shared by every list and detail view.

use super::entities::{DeliveryStatus, Parcel, PaymentStatus};

/// Colour family a badge is drawn in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tone {
    Red,
    Blue,
    Purple,
    Yellow,
    Indigo,
    Cyan,
    Orange,
    Green,
    Gray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTag<'a> {
    Payment(PaymentStatus),
    Delivery(&'a DeliveryStatus),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Badge {
    pub label: String,
    pub tone: Tone,
}

pub fn badge(tag: StatusTag<'_>) -> Badge {
    let (label, tone) = match tag {
        StatusTag::Payment(PaymentStatus::Unpaid) => ("Unpaid", Tone::Red),
        StatusTag::Payment(PaymentStatus::Paid) => ("Paid", Tone::Blue),
        StatusTag::Delivery(status) => match status {
            DeliveryStatus::Pending => ("Pending", Tone::Gray),
            DeliveryStatus::ReadyToPickup => ("Ready to Pickup", Tone::Purple),
            DeliveryStatus::InTransit => ("In Transit", Tone::Yellow),
            DeliveryStatus::ReachedServiceCenter => ("At Service Center", Tone::Indigo),
            DeliveryStatus::Shipped => ("Shipped", Tone::Cyan),
            DeliveryStatus::ReadyForDelivery => ("Ready for Delivery", Tone::Orange),
            DeliveryStatus::OutForDelivery => ("Out for Delivery", Tone::Orange),
            DeliveryStatus::Delivered => ("Delivered", Tone::Green),
            DeliveryStatus::Damaged => ("Damaged", Tone::Red),
            DeliveryStatus::Delayed => ("Delayed", Tone::Yellow),
            DeliveryStatus::Other(raw) => {
                return Badge {
                    label: raw.clone(),
                    tone: Tone::Gray,
                }
            }
        },
    };
    Badge {
        label: label.to_string(),
        tone,
    }
}

/// The badge a parcel row shows: payment first, delivery once paid.
pub fn parcel_badge(parcel: &Parcel) -> Badge {
    if parcel.is_paid() {
        badge(StatusTag::Delivery(&parcel.delivery_status))
    } else {
        badge(StatusTag::Payment(parcel.payment_status))
    }
}
