use std::error::Error;
use std::io::{self, Write};

use stealthscraper_rs::{FetchOptions, StealthScraper, VERSION};

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

#[tokio::test]
#[ignore = "Requires network access and manual input"]
async fn interactive_fetch() -> Result<(), Box<dyn Error>> {
    println!("stealthscraper-rs {VERSION}");

    let url = prompt("URL to fetch [https://example.com]:")?;
    let url = if url.is_empty() {
        "https://example.com".to_string()
    } else {
        url
    };
    let stealth = parse_bool(&prompt("Use stealth mode? [y/N]:")?, false);

    let mut scraper = StealthScraper::builder().with_event_logging().build()?;
    if stealth {
        scraper.refresh_stealth().await?;
        println!(
            "Loaded {} proxies and {} user agents",
            scraper.identities().proxies().len(),
            scraper.identities().user_agents().len()
        );
    }

    let options = FetchOptions {
        stealth: Some(stealth),
        redraw_identity: true,
    };
    let document = scraper.fetch_with(&url, options).await?;
    println!("Status: {}", document.status());
    println!("Final URL: {}", document.url());
    println!("Body length: {}", document.html().html().len());
    Ok(())
}
