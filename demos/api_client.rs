/// Example HTTP client driving the form server through its JSON API
///
/// Run the server first (offline mode uses the built-in sample localities):
/// ```bash
/// PLZ_OFFLINE=1 cargo run --bin server
/// ```
///
/// Then run this example:
/// ```bash
/// cargo run --example api_client
/// ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
enum FormEvent {
    CityEdited(String),
    PostalCodeEdited(String),
    CandidateSelected(String),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FormSnapshot {
    city: String,
    postal_code: String,
    postal_code_candidates: Vec<Locality>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Locality {
    name: String,
    postal_code: String,
}

#[derive(Deserialize, Debug)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Longer than the server's debounce period
const SETTLE: Duration = Duration::from_millis(1500);

fn print_form(form: &FormSnapshot) {
    println!("   Locality: {}", form.city);
    if form.postal_code_candidates.is_empty() {
        println!("   PLZ:      {}", form.postal_code);
    } else {
        println!("   PLZ candidates:");
        for candidate in &form.postal_code_candidates {
            println!("     {} ({})", candidate.postal_code, candidate.name);
        }
    }
    if let Some(error) = &form.error {
        println!("   Error: {}", error);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let client = reqwest::Client::new();
    let events_url = format!("{}/api/form/events", base_url);
    let form_url = format!("{}/api/form", base_url);

    println!("=== PLZ Form HTTP API Client Demo ===\n");

    // 1. Health Check
    println!("1. Checking server health...");
    let health_url = format!("{}/health", base_url);
    let health: HealthResponse = client.get(&health_url).send().await?.json().await?;
    println!("   Server status: {}", health.status);
    println!("   Version: {}\n", health.version);

    // 2. Type a city with a single postal code
    println!("2. Typing city \"Berlin\"...");
    client
        .post(&events_url)
        .json(&FormEvent::CityEdited("Berlin".to_string()))
        .send()
        .await?
        .error_for_status()?;
    tokio::time::sleep(SETTLE).await;
    let form: FormSnapshot = client.get(&form_url).send().await?.json().await?;
    print_form(&form);

    // 3. Type an ambiguous city and pick one of its postal codes
    println!("3. Typing city \"Schönberg\"...");
    client
        .post(&events_url)
        .json(&FormEvent::CityEdited("Schönberg".to_string()))
        .send()
        .await?
        .error_for_status()?;
    tokio::time::sleep(SETTLE).await;
    let form: FormSnapshot = client.get(&form_url).send().await?.json().await?;
    print_form(&form);

    if let Some(choice) = form.postal_code_candidates.last() {
        println!("   Selecting {}...", choice.postal_code);
        let form: FormSnapshot = client
            .post(&events_url)
            .json(&FormEvent::CandidateSelected(choice.postal_code.clone()))
            .send()
            .await?
            .json()
            .await?;
        print_form(&form);
    }

    // 4. Type an unknown postal code
    println!("4. Typing PLZ \"54321\"...");
    client
        .post(&events_url)
        .json(&FormEvent::PostalCodeEdited("54321".to_string()))
        .send()
        .await?
        .error_for_status()?;
    tokio::time::sleep(SETTLE).await;
    let form: FormSnapshot = client.get(&form_url).send().await?.json().await?;
    print_form(&form);

    println!("=== Demo Complete ===");

    Ok(())
}
