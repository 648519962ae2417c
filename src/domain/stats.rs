//! Dashboard summaries and list filters computed from fetched parcels and payments.

use std::cmp::Reverse;

use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};

use super::entities::{DeliveryStatus, Parcel, Payment, PaymentStatus};

const RECENT_WINDOW: Duration = Duration::days(7);
const LATE_INVOICE_AFTER: Duration = Duration::days(3);
const RECENT_LIMIT: usize = 5;
const ADMIN_LIST_LIMIT: usize = 6;
const ALERT_LIMIT: usize = 4;

pub struct CustomerOverview {
    pub total_parcels: usize,
    pub unpaid: usize,
    pub paid: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub total_payments: usize,
    pub total_spent: Decimal,
    pub parcels_this_week: usize,
    pub payments_this_week: usize,
    pub recent_parcels: Vec<Parcel>,
    pub recent_payments: Vec<Payment>,
}

pub fn customer_overview(
    parcels: &[Parcel],
    payments: &[Payment],
    now: OffsetDateTime,
) -> CustomerOverview {
    let since = now - RECENT_WINDOW;
    let is_recent = |at: Option<OffsetDateTime>| at.map(|at| at >= since).unwrap_or(false);

    let mut recent_parcels = parcels.to_vec();
    recent_parcels.sort_by_key(|p| Reverse(p.created_at));
    recent_parcels.truncate(RECENT_LIMIT);

    let mut recent_payments = payments.to_vec();
    recent_payments.sort_by_key(|p| Reverse(p.created_at));
    recent_payments.truncate(RECENT_LIMIT);

    CustomerOverview {
        total_parcels: parcels.len(),
        unpaid: count(parcels, |p| p.payment_status == PaymentStatus::Unpaid),
        paid: count(parcels, |p| p.payment_status == PaymentStatus::Paid),
        in_transit: count(parcels, |p| p.delivery_status == DeliveryStatus::InTransit),
        delivered: count(parcels, |p| p.delivery_status == DeliveryStatus::Delivered),
        total_payments: payments.len(),
        total_spent: payments.iter().map(|p| p.amount).sum(),
        parcels_this_week: count(parcels, |p| is_recent(p.created_at)),
        payments_this_week: payments.iter().filter(|p| is_recent(p.created_at)).count(),
        recent_parcels,
        recent_payments,
    }
}

fn count(parcels: &[Parcel], predicate: impl Fn(&Parcel) -> bool) -> usize {
    parcels.iter().filter(|p| predicate(p)).count()
}

pub struct AdminOverview {
    pub to_pay: usize,
    pub ready_for_pickup: usize,
    pub in_transit: usize,
    pub ready_to_deliver: usize,
    pub delivered: usize,
    pub late_invoices: Vec<LateInvoice>,
    pub alerts: ShipmentAlerts,
    pub week: Vec<DayBucket>,
}

pub struct LateInvoice {
    pub parcel: Parcel,
    pub days_overdue: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    Damaged,
    Weather,
}

pub struct AlertItem {
    pub kind: AlertKind,
    pub parcel_id: String,
    pub when: String,
}

pub struct ShipmentAlerts {
    pub damaged: usize,
    pub delayed: usize,
    pub items: Vec<AlertItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DayBucket {
    pub day: &'static str,
    pub packages: usize,
    pub income: Decimal,
}

pub fn admin_overview(parcels: &[Parcel], now: OffsetDateTime) -> AdminOverview {
    AdminOverview {
        to_pay: count(parcels, |p| p.payment_status == PaymentStatus::Unpaid),
        ready_for_pickup: count(parcels, |p| {
            p.is_paid() && p.delivery_status == DeliveryStatus::Pending
        }),
        in_transit: count(parcels, |p| p.delivery_status == DeliveryStatus::InTransit),
        ready_to_deliver: count(parcels, |p| {
            p.delivery_status == DeliveryStatus::OutForDelivery
        }),
        delivered: count(parcels, |p| p.delivery_status == DeliveryStatus::Delivered),
        late_invoices: late_invoices(parcels, now),
        alerts: shipment_alerts(parcels, now),
        week: current_week(parcels, now),
    }
}

/// Unpaid parcels older than three days, oldest first.
pub fn late_invoices(parcels: &[Parcel], now: OffsetDateTime) -> Vec<LateInvoice> {
    let cutoff = now - LATE_INVOICE_AFTER;
    let mut late: Vec<_> = parcels
        .iter()
        .filter(|p| p.payment_status == PaymentStatus::Unpaid)
        .filter_map(|p| p.created_at.filter(|at| *at < cutoff).map(|at| (at, p)))
        .collect();
    late.sort_by_key(|(at, _)| *at);
    late.into_iter()
        .take(ADMIN_LIST_LIMIT)
        .map(|(at, parcel)| LateInvoice {
            parcel: parcel.clone(),
            days_overdue: (now - at).whole_days(),
        })
        .collect()
}

/// Why a parcel shows up in shipment alerts: its delivery status, or failing
/// that a note mentioning damage or weather.
fn alert_kind(parcel: &Parcel) -> Option<AlertKind> {
    match parcel.delivery_status {
        DeliveryStatus::Damaged => return Some(AlertKind::Damaged),
        DeliveryStatus::Delayed => return Some(AlertKind::Weather),
        _ => {}
    }
    let notes = parcel.notes.as_deref()?.to_lowercase();
    if notes.contains("damage") {
        Some(AlertKind::Damaged)
    } else if notes.contains("weather") || notes.contains("delay") {
        Some(AlertKind::Weather)
    } else {
        None
    }
}

pub fn shipment_alerts(parcels: &[Parcel], now: OffsetDateTime) -> ShipmentAlerts {
    let mut flagged: Vec<(&Parcel, AlertKind)> = parcels
        .iter()
        .filter_map(|p| alert_kind(p).map(|kind| (p, kind)))
        .collect();
    let damaged = flagged
        .iter()
        .filter(|(_, kind)| *kind == AlertKind::Damaged)
        .count();
    let delayed = flagged.len() - damaged;
    flagged.sort_by_key(|(p, _)| Reverse(p.last_activity()));

    let items = flagged
        .into_iter()
        .take(ALERT_LIMIT)
        .map(|(p, kind)| AlertItem {
            kind,
            parcel_id: p.id.clone(),
            when: p
                .last_activity()
                .map(|at| time_ago(now, at))
                .unwrap_or_else(|| "Unknown".to_string()),
        })
        .collect();

    ShipmentAlerts {
        damaged,
        delayed,
        items,
    }
}

/// Package counts and income for each day of the week containing `now`, Monday first.
pub fn current_week(parcels: &[Parcel], now: OffsetDateTime) -> Vec<DayBucket> {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    let today = now.date();
    let monday = today - Duration::days(i64::from(today.weekday().number_days_from_monday()));

    DAYS.iter()
        .enumerate()
        .map(|(offset, day)| {
            let date = monday + Duration::days(offset as i64);
            let on_day: Vec<&Parcel> = parcels
                .iter()
                .filter(|p| {
                    p.created_at
                        .map(|at| at.to_offset(now.offset()).date() == date)
                        .unwrap_or(false)
                })
                .collect();
            DayBucket {
                day: *day,
                packages: on_day.len(),
                income: on_day.iter().map(|p| p.cost).sum(),
            }
        })
        .collect()
}

/// Human-readable age, e.g. "5 minutes ago".
pub fn time_ago(now: OffsetDateTime, at: OffsetDateTime) -> String {
    let secs = (now - at).whole_seconds().max(0);
    if secs < 60 {
        "Just now".to_string()
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Payment(PaymentStatus),
    Delivery(DeliveryStatus),
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" | "all" => StatusFilter::All,
            other => PaymentStatus::parse(other)
                .map(StatusFilter::Payment)
                .unwrap_or_else(|| StatusFilter::Delivery(DeliveryStatus::from(other))),
        }
    }

    fn matches(&self, parcel: &Parcel) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Payment(status) => parcel.payment_status == *status,
            StatusFilter::Delivery(status) => parcel.delivery_status == *status,
        }
    }
}

/// Filter a parcel list by status and a case-insensitive search over name,
/// tracking code and receiver.
pub fn filter_parcels<'a>(
    parcels: &'a [Parcel],
    status: &StatusFilter,
    query: &str,
) -> Vec<&'a Parcel> {
    let query = query.trim().to_lowercase();
    parcels
        .iter()
        .filter(|p| status.matches(p))
        .filter(|p| {
            query.is_empty()
                || p.name.to_lowercase().contains(&query)
                || p.receiver_name.to_lowercase().contains(&query)
                || p
                    .tracking_code
                    .as_deref()
                    .map(|code| code.to_lowercase().contains(&query))
                    .unwrap_or(false)
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentSort {
    #[default]
    Newest,
    Oldest,
    HighestAmount,
    LowestAmount,
}

pub fn search_payments<'a>(
    payments: &'a [Payment],
    term: &str,
    sort: PaymentSort,
) -> Vec<&'a Payment> {
    let term = term.trim().to_lowercase();
    let contains = |value: Option<&str>| {
        value
            .map(|v| v.to_lowercase().contains(&term))
            .unwrap_or(false)
    };
    let mut found: Vec<&Payment> = payments
        .iter()
        .filter(|p| {
            term.is_empty()
                || contains(Some(p.parcel_name.as_str()))
                || contains(p.tracking_number.as_deref())
                || contains(p.transaction_id.as_deref())
        })
        .collect();

    match sort {
        PaymentSort::Newest => found.sort_by_key(|p| Reverse(p.created_at)),
        PaymentSort::Oldest => found.sort_by_key(|p| p.created_at),
        PaymentSort::HighestAmount => found.sort_by_key(|p| Reverse(p.amount)),
        PaymentSort::LowestAmount => found.sort_by_key(|p| p.amount),
    }
    found
}
