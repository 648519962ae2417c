//! Parcel Portal command line.
//!
//! # Usage
//!
//! ```bash
//! # Price a 4 kg parcel inside Dhaka
//! parcel-portal quote non-document Dhaka Dhaka --weight 4
//!
//! # List serviceable districts
//! parcel-portal districts Dhaka
//!
//! # Track a parcel (no sign-in needed)
//! parcel-portal track TRK-20261015-0001
//!
//! # List your parcels (needs PARCEL_PORTAL_EMAIL and PARCEL_PORTAL_TOKEN)
//! parcel-portal parcels
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use parcel_portal::domain::{display_amount, parcel_badge, Parcel, ParcelKind};
use parcel_portal::infra::{AuthUser, StaticTokenProvider};
use parcel_portal::util::version::version_label;
use parcel_portal::{Portal, PortalConfig, PortalError};

#[derive(Parser)]
#[command(name = "parcel-portal")]
#[command(author, version, about = "Parcel Portal command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a shipment
    Quote {
        /// `document` or `non-document`
        kind: String,
        /// Origin district
        from: String,
        /// Destination district
        to: String,
        /// Weight in kg (non-documents only)
        #[arg(short, long)]
        weight: Option<Decimal>,
    },
    /// List regions with a warehouse
    Regions,
    /// List serviceable districts of a region
    Districts { region: String },
    /// Look up a parcel by tracking code
    Track { code: String },
    /// List the signed-in user's parcels
    Parcels,
    /// List the signed-in user's payments
    Payments,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = %version_label(), "starting");

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = PortalConfig::load()?;
    let portal = Portal::new(config, Arc::new(identity_from_env()))?;
    portal.init();

    let result = execute(&portal, cli.command).await;
    // Also on the error path, so the identity tracker task is stopped.
    portal.teardown();
    result
}

async fn execute(portal: &Portal, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Quote {
            kind,
            from,
            to,
            weight,
        } => {
            let kind = ParcelKind::parse(&kind)
                .ok_or_else(|| PortalError::InvalidInput(format!("unknown parcel kind `{kind}`")))?;
            let quote = portal.quote(kind, weight, &from, &to)?;
            println!("Base:      {}", display_amount(quote.base));
            if !quote.extra_weight_charge.is_zero() {
                println!("Weight:    {}", display_amount(quote.extra_weight_charge));
            }
            if !quote.surcharge.is_zero() {
                println!("Surcharge: {}", display_amount(quote.surcharge));
            }
            println!("Total:     {}", display_amount(quote.total));
        }
        Commands::Regions => {
            for region in portal.zones().regions() {
                println!("{region}");
            }
        }
        Commands::Districts { region } => {
            let districts = portal.zones().districts(&region);
            if districts.is_empty() {
                return Err(PortalError::InvalidInput(format!("no serviceable districts in {region}")).into());
            }
            for district in districts {
                println!("{district}");
            }
        }
        Commands::Track { code } => {
            let parcel = portal.track_parcel(&code).settled().await?;
            print_parcel(&parcel);
        }
        Commands::Parcels => {
            let email = portal.session().email();
            let parcels = portal.user_parcels(email.as_deref()).settled().await?;
            if parcels.is_empty() {
                println!("No parcels yet.");
            }
            for parcel in parcels.iter() {
                print_parcel(parcel);
            }
        }
        Commands::Payments => {
            let email = portal.session().email();
            let payments = portal.payment_history(email.as_deref()).settled().await?;
            for payment in payments.iter() {
                println!(
                    "{:<24} {:>10}  {}",
                    payment.parcel_name,
                    display_amount(payment.amount),
                    payment.transaction_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

fn print_parcel(parcel: &Parcel) {
    println!(
        "{:<24} {:<14} {:>10}  {}",
        parcel.name,
        parcel_badge(parcel).label,
        display_amount(parcel.cost),
        parcel.tracking_code.as_deref().unwrap_or("-")
    );
}

/// `PARCEL_PORTAL_EMAIL` and `PARCEL_PORTAL_TOKEN` stand in for an interactive sign-in.
fn identity_from_env() -> StaticTokenProvider {
    let email = std::env::var("PARCEL_PORTAL_EMAIL").ok().filter(|v| !v.trim().is_empty());
    let token = std::env::var("PARCEL_PORTAL_TOKEN").ok().filter(|v| !v.trim().is_empty());
    match email {
        Some(email) => StaticTokenProvider::new(
            Some(AuthUser {
                email,
                display_name: None,
            }),
            token,
        ),
        None => StaticTokenProvider::anonymous(),
    }
}
