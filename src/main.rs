use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use plz_sync::{
    FormConfig, FormEvent, FormSession, FormState, LocalityLookup, OpenPlzClient, OpenPlzConfig,
    StaticLookup,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("Commands:");
    eprintln!("  city <name>     type into the city field (empty to clear)");
    eprintln!("  plz <code>      type into the postal code field");
    eprintln!("  select <code>   pick one of the offered postal codes");
    eprintln!("  show            print the form");
    eprintln!("  quit");
}

/// Render the form the way the page shows it
fn render(state: &FormState) -> String {
    let mut out = format!("Locality: {}\n", state.city);
    if state.postal_code_candidates.is_empty() {
        out.push_str(&format!("PLZ:      {}\n", state.postal_code));
    } else {
        out.push_str("PLZ:      select one of\n");
        for candidate in &state.postal_code_candidates {
            out.push_str(&format!(
                "            {} ({})\n",
                candidate.postal_code, candidate.name
            ));
        }
    }
    if let Some(error) = state.error {
        out.push_str(&format!("! {}\n", error));
    }
    out
}

/// Turn an input line into a form event, or `None` for anything else
fn parse_event(command: &str, value: &str) -> Option<FormEvent> {
    match command {
        "city" => Some(FormEvent::CityEdited(value.to_string())),
        "plz" => Some(FormEvent::PostalCodeEdited(value.to_string())),
        "select" => Some(FormEvent::CandidateSelected(value.to_string())),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interleave with the rendered form
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plz_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let offline = env::args().skip(1).any(|arg| arg == "--offline");
    let lookup: Arc<dyn LocalityLookup> = if offline {
        eprintln!("Using built-in sample localities");
        Arc::new(StaticLookup::sample())
    } else {
        Arc::new(
            OpenPlzClient::with_config(OpenPlzConfig::from_env())
                .context("Failed to build lookup client")?,
        )
    };

    println!("Let's find your city or postal code in Germany");
    print_usage();

    let session = FormSession::spawn(lookup, FormConfig::from_env());
    let form = session.handle();

    // Re-render whenever the visible form changes
    let mut updates = form.subscribe();
    let renderer = tokio::spawn(async move {
        let mut last = String::new();
        while updates.changed().await.is_ok() {
            let screen = render(&updates.borrow_and_update());
            if screen != last {
                println!("\n{}", screen);
                last = screen;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, value) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" => continue,
            "quit" | "exit" => break,
            "show" => println!("\n{}", render(&form.snapshot())),
            _ => match parse_event(command, value.trim()) {
                Some(event) => form.send(event)?,
                None => {
                    eprintln!("Unknown command: {}", command);
                    print_usage();
                }
            },
        }
    }

    session.close().await?;
    let _ = renderer.await;
    Ok(())
}
