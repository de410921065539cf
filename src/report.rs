use std::fmt::Write;

use crate::models::{AlertLevel, AlertLevelSummary, AlertRecord};

pub fn summarize_by_level(alerts: &[AlertRecord]) -> Vec<AlertLevelSummary> {
    let mut map: std::collections::BTreeMap<AlertLevel, usize> = std::collections::BTreeMap::new();

    for alert in alerts {
        *map.entry(alert.level()).or_insert(0) += 1;
    }

    let mut summaries: Vec<AlertLevelSummary> = map
        .into_iter()
        .map(|(level, weeks)| AlertLevelSummary { level, weeks })
        .collect();

    summaries.sort_by(|a, b| b.level.cmp(&a.level));
    summaries
}

pub fn build_report(geocode: &str, alerts: &[AlertRecord], recent_limit: usize) -> String {
    let mut chronological = alerts.to_vec();
    chronological.sort_by_key(|alert| (alert.year, alert.week));
    let summaries = summarize_by_level(&chronological);

    let mut output = String::new();

    let _ = writeln!(output, "# Dengue Surveillance Report");

    let (Some(first), Some(last)) = (chronological.first(), chronological.last()) else {
        let _ = writeln!(output, "Generated for geocode {geocode}");
        let _ = writeln!(output);
        let _ = writeln!(output, "No alerts stored yet.");
        return output;
    };

    let _ = writeln!(
        output,
        "Generated for geocode {} ({} weeks, {} to {})",
        geocode,
        chronological.len(),
        first.label(),
        last.label()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    let total_notified: i64 = chronological.iter().map(|a| a.notified_cases).sum();
    let average_notified = total_notified as f64 / chronological.len() as f64;
    let _ = writeln!(output, "- Notified cases: {total_notified} (avg {average_notified:.2} per week)");

    if let Some(peak) = chronological
        .iter()
        .max_by(|a, b| a.estimated_cases.total_cmp(&b.estimated_cases))
    {
        let _ = writeln!(
            output,
            "- Peak estimate: {:.1} cases in week {}",
            peak.estimated_cases,
            peak.label()
        );
    }

    let out_of_bounds = chronological
        .iter()
        .filter(|alert| !alert.estimate_within_bounds())
        .count();
    if out_of_bounds > 0 {
        let _ = writeln!(
            output,
            "- Estimates outside their confidence bounds: {out_of_bounds} weeks"
        );
    }

    if let Some(highest) = summaries.first() {
        let _ = writeln!(
            output,
            "- Highest alert level: {} ({})",
            highest.level.code(),
            highest.level
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alert Level Mix");
    for summary in summaries.iter() {
        let _ = writeln!(
            output,
            "- {} ({}): {} weeks",
            summary.level,
            summary.level.description(),
            summary.weeks
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Weeks");
    for alert in chronological.iter().rev().take(recent_limit) {
        let _ = writeln!(
            output,
            "- {}: {} notified, {:.1} estimated [{:.1}-{:.1}], level {}, Rt {:.2}",
            alert.label(),
            alert.notified_cases,
            alert.estimated_cases,
            alert.estimated_cases_min,
            alert.estimated_cases_max,
            alert.level(),
            alert.effective_reproduction_number
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;

    fn alert(week: i32, level: i32, notified: i64, estimate: f64) -> AlertRecord {
        let mut alert = sample_record(week, 2024);
        alert.alert_level = level;
        alert.notified_cases = notified;
        alert.estimated_cases = estimate;
        alert
    }

    #[test]
    fn levels_are_counted_highest_first() {
        let alerts = vec![alert(1, 1, 1, 1.0), alert(2, 3, 1, 1.0), alert(3, 1, 1, 1.0)];
        let summaries = summarize_by_level(&alerts);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].level, AlertLevel::Orange);
        assert_eq!(summaries[0].weeks, 1);
        assert_eq!(summaries[1].level, AlertLevel::Green);
        assert_eq!(summaries[1].weeks, 2);
    }

    #[test]
    fn report_covers_summary_and_recent_weeks() {
        let alerts = vec![
            alert(3, 2, 30, 35.0),
            alert(1, 1, 10, 12.0),
            alert(2, 1, 20, 90.5),
        ];
        let report = build_report("3106200", &alerts, 2);

        assert!(report.contains("Generated for geocode 3106200 (3 weeks, 2024-01 to 2024-03)"));
        assert!(report.contains("- Notified cases: 60 (avg 20.00 per week)"));
        assert!(report.contains("- Peak estimate: 90.5 cases in week 2024-02"));
        assert!(report.contains("- Highest alert level: 2 (yellow)"));
        assert!(report.contains("- 2024-03: 30 notified"));
        assert!(report.contains("- 2024-02: 20 notified"));
        assert!(!report.contains("- 2024-01: 10 notified"));
        // Every estimate sits below the sample lower bound of 110.
        assert!(report.contains("- Estimates outside their confidence bounds: 3 weeks"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report("3106200", &[], 5);
        assert!(report.contains("No alerts stored yet."));
    }
}
