use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grid emission factor used for carbon accounting, kg CO2 per kWh.
pub const GRID_EMISSION_KG_PER_KWH: f64 = 0.7;
/// Fallback electricity price when none is configured (VND per kWh).
pub const DEFAULT_PRICE_PER_KWH: f64 = 3000.0;

/// One recorded utility bill, tagged as before or after the monitoring
/// solution was installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: String,
    /// `YYYY-MM`.
    pub month: String,
    pub kwh: f64,
    pub amount: f64,
    #[serde(rename = "isBefore")]
    pub is_before: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SavingsSummary {
    #[serde(rename = "kwhSaved")]
    pub kwh_saved: f64,
    #[serde(rename = "moneySaved")]
    pub money_saved: f64,
    #[serde(rename = "percentSaved")]
    pub percent_saved: f64,
    #[serde(rename = "co2Kg")]
    pub co2_kg: f64,
    #[serde(rename = "carbonCredits")]
    pub carbon_credits: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BillComparison {
    #[serde(rename = "avgBeforeKwh")]
    pub avg_before_kwh: f64,
    #[serde(rename = "avgAfterKwh")]
    pub avg_after_kwh: f64,
    #[serde(rename = "beforeCount")]
    pub before_count: usize,
    #[serde(rename = "afterCount")]
    pub after_count: usize,
    pub savings: SavingsSummary,
}

pub fn carbon_credits(kwh_saved: f64) -> (f64, f64) {
    let co2_kg = kwh_saved * GRID_EMISSION_KG_PER_KWH;
    (co2_kg, co2_kg / 1000.0)
}

pub fn calculate_savings(before_kwh: f64, after_kwh: f64, price_per_kwh: f64) -> SavingsSummary {
    let kwh_saved = before_kwh - after_kwh;
    let percent_saved = if before_kwh > 0.0 {
        round1(kwh_saved / before_kwh * 100.0)
    } else {
        0.0
    };
    let (co2_kg, carbon_credits) = carbon_credits(kwh_saved);

    SavingsSummary {
        kwh_saved,
        money_saved: kwh_saved * price_per_kwh,
        percent_saved,
        co2_kg,
        carbon_credits,
    }
}

/// Compare average monthly usage before and after, over all recorded bills.
pub fn compare_bills(bills: &[Bill], price_per_kwh: f64) -> BillComparison {
    let before: Vec<&Bill> = bills.iter().filter(|bill| bill.is_before).collect();
    let after: Vec<&Bill> = bills.iter().filter(|bill| !bill.is_before).collect();

    let avg = |set: &[&Bill]| {
        if set.is_empty() {
            0.0
        } else {
            set.iter().map(|bill| bill.kwh).sum::<f64>() / set.len() as f64
        }
    };

    let avg_before_kwh = avg(&before);
    let avg_after_kwh = avg(&after);

    BillComparison {
        avg_before_kwh,
        avg_after_kwh,
        before_count: before.len(),
        after_count: after.len(),
        savings: calculate_savings(avg_before_kwh, avg_after_kwh, price_per_kwh),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
