mod config;
mod document;
mod ledger;
mod llm_extract;
mod price_book;
mod report;

use config::Config;
use document::Document;
use ledger::InvoiceData;
use ledger::pipeline::Action;
use ledger::session::Session;
use llm_extract::{LlmExtractor, run_extraction};
use price_book::PriceBook;
use report::Report;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "invoice_ledger.toml";

const USAGE: &str = "usage:
  invoice_ledger [--config <path>] extract <invoice> [price_book]
  invoice_ledger [--config <path>] check <invoice.json>
  invoice_ledger [--config <path>] apply <invoice.json> <actions.json>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_config_flag(&mut args).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let cfg = Config::load_or_default(&config_path)?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["extract", invoice, rest @ ..] if rest.len() <= 1 => {
            extract(&cfg, Path::new(invoice), rest.first().map(Path::new)).await
        }
        ["check", invoice] => check(&cfg, Path::new(invoice)),
        ["apply", invoice, actions] => apply(&cfg, Path::new(invoice), Path::new(actions)),
        _ => {
            eprintln!("{USAGE}");
            Err("invalid arguments".into())
        }
    }
}

/// Remove `--config <path>` from the argument list, if present.
fn take_config_flag(args: &mut Vec<String>) -> Option<PathBuf> {
    let pos = args.iter().position(|a| a == "--config")?;
    if pos + 1 >= args.len() {
        return None;
    }
    let path = args.remove(pos + 1);
    args.remove(pos);
    Some(PathBuf::from(path))
}

async fn extract(
    cfg: &Config,
    invoice_path: &Path,
    price_book_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = Document::load(invoice_path)?;
    let price_book = PriceBook::resolve(price_book_path, cfg.extraction.price_book_max_chars);

    let extractor = LlmExtractor::new(&cfg.extraction)?;
    let session = Session::from_extraction(run_extraction(&extractor, &document, &price_book).await);

    match session {
        Session::Loaded(ref data) => {
            println!("{}", Report::new(data, &cfg.ledger));
            println!("{}", serde_json::to_string_pretty(data)?);
            Ok(())
        }
        Session::Failed(message) => Err(message.into()),
        Session::Empty => Ok(()),
    }
}

fn load_invoice(path: &Path) -> Result<InvoiceData, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let data: InvoiceData = serde_json::from_str(&content)?;
    Ok(data.normalized())
}

fn check(cfg: &Config, invoice_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_invoice(invoice_path)?;
    info!(path = %invoice_path.display(), rows = data.line_items.len(), "Loaded invoice JSON");
    println!("{}", Report::new(&data, &cfg.ledger));
    Ok(())
}

fn apply(
    cfg: &Config,
    invoice_path: &Path,
    actions_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = load_invoice(invoice_path)?;
    let actions: Vec<Action> = serde_json::from_str(&fs::read_to_string(actions_path)?)?;
    info!(rows = data.line_items.len(), actions = actions.len(), "Replaying actions");

    let session = Session::Loaded(data).apply(&actions);
    let Some(data) = session.invoice() else {
        return Err("no invoice loaded".into());
    };

    println!("{}", Report::new(data, &cfg.ledger));
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_take_config_flag() {
        let mut a = args(&["--config", "custom.toml", "check", "inv.json"]);
        assert_eq!(take_config_flag(&mut a), Some(PathBuf::from("custom.toml")));
        assert_eq!(a, args(&["check", "inv.json"]));

        let mut a = args(&["check", "inv.json"]);
        assert_eq!(take_config_flag(&mut a), None);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_load_invoice_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.json");
        fs::write(
            &path,
            r#"{"invoice_header": {"invoice_total": 10}, "line_items": [{"row_index": 5, "case_discount": -1, "confidence": 1}]}"#,
        )
        .unwrap();
        let data = load_invoice(&path).unwrap();
        assert_eq!(data.line_items[0].row_index, 1);
        assert_eq!(data.line_items[0].case_discount, Some(1.0));
    }
}
