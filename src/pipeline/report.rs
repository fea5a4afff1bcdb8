//! Plain-text performance report over ledger statistics.

use std::fmt::Write;

use crate::store::LedgerStats;

/// Render the report for a stats window.
///
/// Categories are listed by descending count, then by name.
pub fn generate_report(stats: &LedgerStats, days_back: u32) -> String {
    let mut report = String::with_capacity(512);
    let title = format!("Email Scoring System - Report (last {days_back} days)");

    let _ = writeln!(report, "{title}");
    let _ = writeln!(report, "{}", "=".repeat(title.chars().count()));
    report.push('\n');
    let _ = writeln!(report, "Total Emails Processed: {}", stats.total);
    let _ = writeln!(report, "Average Confidence: {:.2}", stats.avg_confidence);
    let _ = writeln!(report, "High Importance Emails: {}", stats.high_importance_count);
    let _ = writeln!(report, "Likely Spam: {}", stats.spam_count);
    report.push('\n');
    let _ = writeln!(report, "Category Breakdown:");
    let _ = writeln!(report, "{}", "-".repeat(20));

    let mut categories: Vec<(&String, &u64)> = stats.categories.iter().collect();
    categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (category, count) in categories {
        let percentage = if stats.total > 0 {
            *count as f64 / stats.total as f64 * 100.0
        } else {
            0.0
        };
        let _ = writeln!(report, "{category:15}: {count:3} ({percentage:5.1}%)");
    }

    report
}
