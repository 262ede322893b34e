//! Decode command - inspect a scanned descriptor payload

use anyhow::{Context, Result};
use clap::Args;
use peerlens_core::descriptor;
use peerlens_core::negotiation::sdp;

/// Arguments for the decode command
#[derive(Args)]
pub struct DecodeArgs {
    /// Payload as read from the code
    payload: String,

    /// Print the descriptor as JSON
    #[arg(long)]
    json: bool,
}

/// Decode a payload and print its fields
pub async fn decode(args: DecodeArgs) -> Result<()> {
    let descriptor = descriptor::decode(&args.payload).context("Payload is not a valid descriptor")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(());
    }

    println!("Session:   {}", descriptor.session_id());
    println!("Endpoint:  {}", descriptor.endpoint_hint());

    match descriptor.offer_sdp() {
        None => println!("SDP:       (none)"),
        Some(offer) => {
            let status = match sdp::check_well_formed(offer) {
                Ok(()) => "well-formed".to_string(),
                Err(reason) => reason,
            };
            println!("SDP:       {} bytes, {}", offer.len(), status);
            println!();
            for line in offer.lines() {
                println!("  {}", line);
            }
        }
    }

    Ok(())
}
