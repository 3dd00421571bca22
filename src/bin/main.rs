// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::Utc;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use notemarket_rs::{MarketEngine, NoteId, UserId, WithdrawalDecision, WithdrawalId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Notemarket - Replay marketplace event CSV files
///
/// Reads marketplace events from a CSV file, settles them through the
/// engine, and outputs final user balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "notemarket-rs")]
#[command(about = "A marketplace engine that replays event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with events
    ///
    /// Expected format: event,user,target,amount,detail
    /// Example: cargo run -- events.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Replay events from CSV
    let engine = match process_events(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    let delivered = engine.deliver_notifications();
    tracing::info!(delivered, "notifications delivered");

    // Write results to stdout
    if let Err(e) = write_users(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `event, user, target, amount, detail`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    event: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    target: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    detail: Option<String>,
}

/// Marketplace event decoded from one CSV row.
#[derive(Debug)]
enum Event {
    Register { name: String },
    Publish { owner: UserId, price: Decimal, title: String },
    Purchase { buyer: UserId, note: NoteId, invoice: String },
    WithdrawRequest { user: UserId, amount: Decimal },
    WithdrawAccept { id: WithdrawalId },
    WithdrawReject { id: WithdrawalId },
    WithdrawComplete { id: WithdrawalId, routing: String },
}

impl CsvRecord {
    /// Converts a CSV record into an event.
    ///
    /// Returns `None` for unknown events or missing required fields.
    fn into_event(self) -> Option<Event> {
        match self.event.to_lowercase().as_str() {
            "register" => Some(Event::Register { name: self.detail? }),
            "publish" => Some(Event::Publish {
                owner: UserId(self.user?),
                price: self.amount?,
                title: self.detail?,
            }),
            "purchase" => Some(Event::Purchase {
                buyer: UserId(self.user?),
                note: NoteId(self.target?),
                invoice: self.detail?,
            }),
            "withdraw_request" => Some(Event::WithdrawRequest {
                user: UserId(self.user?),
                amount: self.amount?,
            }),
            "withdraw_accept" => Some(Event::WithdrawAccept {
                id: WithdrawalId(self.target?),
            }),
            "withdraw_reject" => Some(Event::WithdrawReject {
                id: WithdrawalId(self.target?),
            }),
            "withdraw_complete" => Some(Event::WithdrawComplete {
                id: WithdrawalId(self.target?),
                routing: self.detail?,
            }),
            _ => None,
        }
    }
}

/// Derives storage paths for a published note from its title.
fn asset_paths(title: &str) -> (String, String) {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    (format!("covers/{slug}.png"), format!("files/{slug}.pdf"))
}

/// Applies one event to the engine.
fn apply(engine: &MarketEngine, event: Event) -> Result<(), notemarket_rs::MarketError> {
    match event {
        Event::Register { name } => {
            engine.register_user(&name);
            Ok(())
        }
        Event::Publish { owner, price, title } => {
            let (cover, file) = asset_paths(&title);
            engine.publish_note(owner, &title, price, &cover, &file)?;
            Ok(())
        }
        Event::Purchase { buyer, note, invoice } => {
            engine.purchase(note, buyer, &invoice)?;
            Ok(())
        }
        Event::WithdrawRequest { user, amount } => {
            engine.request_withdrawal(user, amount)?;
            Ok(())
        }
        Event::WithdrawAccept { id } => engine.review_withdrawal(id, WithdrawalDecision::Accept),
        Event::WithdrawReject { id } => engine.review_withdrawal(id, WithdrawalDecision::Reject),
        Event::WithdrawComplete { id, routing } => {
            engine.complete_withdrawal(id, &routing, Utc::now())?;
            Ok(())
        }
    }
}

/// Replay events from a CSV reader.
///
/// Streaming parse; malformed rows and events the engine rejects are
/// skipped so one bad row does not abort the replay. Entity IDs are
/// assigned sequentially from 1 in file order, so rows reference users,
/// notes, and withdrawals by their position of creation.
///
/// # CSV Format
///
/// Expected columns: `event, user, target, amount, detail`
///
/// # Example
///
/// ```csv
/// event,user,target,amount,detail
/// register,,,,alice
/// register,,,,bob
/// publish,1,,25.00,Calculus Cheat Sheet
/// purchase,2,1,,inv-001
/// withdraw_request,1,,10.00,
/// withdraw_accept,,1,,
/// withdraw_complete,,1,,DE02-1234
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is
/// invalid. Individual event errors are logged but don't stop the replay.
pub fn process_events<R: Read>(reader: R) -> Result<MarketEngine, csv::Error> {
    let engine = MarketEngine::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " purchase "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    tracing::debug!("skipping invalid event record");
                    continue;
                };

                if let Err(e) = apply(&engine, event) {
                    tracing::warn!(error = %e, "skipping rejected event");
                }
            }
            Err(e) => {
                // Skip malformed rows
                tracing::debug!(error = %e, "skipping malformed row");
                continue;
            }
        }
    }

    Ok(engine)
}

/// Write user balances to a CSV writer
///
/// # CSV Format
///
/// Columns: `user, name, balance, purchases`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_users<W: Write>(engine: &MarketEngine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for user in engine.users() {
        wtr.serialize(&*user)?;
    }

    wtr.flush()?;
    Ok(())
}
