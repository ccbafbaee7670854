use crate::commands::scoring::{round1, round2};
use crate::error::Result;
use crate::models::score::Recommendation;
use chrono::NaiveDate;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const FIRST_ORDER_NUMBER: usize = 10_000;
/// Revenue per full box, EUR
const FULL_BOX_VALUE: f64 = 180.0;
const REVENUE_SHARE: f64 = 0.2;

static NUMBER_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+[a-zA-Z]?)\s+(.+)$").expect("valid regex"));
static NUMBER_LAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s+(\d+[a-zA-Z]?)$").expect("valid regex"));
static NUMBER_AFTER_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?),\s*(\d+[a-zA-Z]?)$").expect("valid regex"));

/// Split an address into (street, number). Only the part before a `/` is kept
/// when several addresses are listed.
pub fn parse_address(address: &str) -> (String, String) {
    let address = address.split('/').next().unwrap_or("").trim();
    if address.is_empty() {
        return (String::new(), String::new());
    }

    if let Some(caps) = NUMBER_FIRST.captures(address) {
        return (caps[2].trim().to_string(), caps[1].to_string());
    }
    if let Some(caps) = NUMBER_LAST.captures(address) {
        return (caps[1].trim().to_string(), caps[2].to_string());
    }
    if let Some(caps) = NUMBER_AFTER_COMMA.captures(address) {
        return (caps[1].trim().to_string(), caps[2].to_string());
    }

    (address.to_string(), String::new())
}

pub fn customer_name(box_id: u32, municipality: &str, container_type: &str) -> String {
    let municipality: String = municipality
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect::<String>()
        .to_lowercase();
    format!("Boite_{municipality}_{}_{box_id}", container_type.to_lowercase())
}

fn delivery_address(address: &str) -> String {
    match parse_address(address) {
        (street, number) if !street.is_empty() && !number.is_empty() => {
            format!("{} {number}", street.to_lowercase())
        }
        (street, _) if !street.is_empty() => street.to_lowercase(),
        _ => address.to_lowercase(),
    }
}

/// Write the delivery sheet for `recommendations`, in rank order. Returns the row count.
pub fn export_recommendations(
    path: &Path,
    recommendations: &[Recommendation],
    delivery_date: NaiveDate,
) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "Customer number",
        "Customer name",
        "Street and number",
        "Postal code",
        "City",
        "Order number",
        "Delivery date",
        "Expected fill (%)",
        "Revenue (EUR)",
    ])?;

    let date = delivery_date.format("%d/%m/%Y").to_string();
    for (rank, rec) in recommendations.iter().enumerate() {
        let postal_code = rec.postal_code.strip_suffix(".0").unwrap_or(&rec.postal_code);
        writer.write_record([
            format!("GFL-C{}", rec.box_id),
            customer_name(rec.box_id, &rec.municipality, &rec.container_type),
            delivery_address(&rec.address),
            postal_code.to_string(),
            rec.municipality.clone(),
            (FIRST_ORDER_NUMBER + rank).to_string(),
            date.clone(),
            round1(rec.expected_fill * 10.0).to_string(),
            round2(FULL_BOX_VALUE * (rec.expected_fill / 10.0) * REVENUE_SHARE).to_string(),
        ])?;
    }

    writer.flush()?;
    info!(
        "CSV export written to {} with {} recommendations",
        path.display(),
        recommendations.len()
    );
    Ok(recommendations.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(street: &str, number: &str) -> (String, String) {
        (street.to_string(), number.to_string())
    }

    #[test]
    fn parses_common_address_shapes() {
        assert_eq!(parse_address("12 Rue de la Paix"), parts("Rue de la Paix", "12"));
        assert_eq!(parse_address("Avenue de la Praille 47"), parts("Avenue de la Praille", "47"));
        assert_eq!(parse_address("Route de Meyrin 3b"), parts("Route de Meyrin", "3b"));
        assert_eq!(parse_address("Rue du Lac,5"), parts("Rue du Lac", "5"));
        assert_eq!(parse_address("Place du Marché"), parts("Place du Marché", ""));
        assert_eq!(parse_address("   "), parts("", ""));
    }

    #[test]
    fn keeps_first_of_several_addresses() {
        assert_eq!(
            parse_address("Chemin des Ouches 1 / Chemin des Sports"),
            parts("Chemin des Ouches", "1")
        );
    }

    #[test]
    fn customer_name_is_compact() {
        assert_eq!(customer_name(42, "Plan-les-Ouates", "Textile"), "Boite_planlesouates_textile_42");
    }

    #[test]
    fn writes_delivery_sheet() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("export.csv");
        let rec = Recommendation {
            box_id: 7,
            address: "Avenue de la Praille 47".to_string(),
            municipality: "Carouge".to_string(),
            postal_code: "1227.0".to_string(),
            container_type: "Textile".to_string(),
            profitability_score: 80.0,
            expected_fill: 6.25,
            equity_score: 8.0,
            days_since_last_visit: None,
            average_fill: 6.0,
        };

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        assert_eq!(export_recommendations(&path, &[rec], date).expect("export"), 1);

        let mut reader = csv::Reader::from_path(&path).expect("reader");
        let row = reader.records().next().expect("row").expect("record");
        assert_eq!(&row[0], "GFL-C7");
        assert_eq!(&row[2], "avenue de la praille 47");
        assert_eq!(&row[3], "1227");
        assert_eq!(&row[5], "10000");
        assert_eq!(&row[6], "03/06/2024");
        assert_eq!(&row[7], "62.5");
        assert_eq!(&row[8], "22.5");
    }
}
