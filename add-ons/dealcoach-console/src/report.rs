//! Plain-text rendering of a scored session and the history list.

use dealcoach_core::{score_band, FeedbackPoint, SessionRecord};

pub fn print_report(record: &SessionRecord) {
    let analysis = &record.analysis;
    println!();
    println!("══════════════ Performance Analysis ══════════════");
    println!(
        "  {} · {} · {} · {}",
        record.product, record.prospect_role, record.difficulty, record.length
    );
    println!(
        "  Overall: {}/100 ({})",
        analysis.scores.overall,
        score_band(analysis.scores.overall)
    );
    println!();
    for line in &analysis.scores.breakdown {
        let filled = usize::from(line.score) / 5;
        println!(
            "  {:<28} {:>3}  {}{}",
            line.label,
            line.score,
            "█".repeat(filled),
            "░".repeat(20 - filled.min(20))
        );
    }

    print_points("Strengths", &analysis.feedback.strengths);
    print_points("Growth areas", &analysis.feedback.improvements);
    if !analysis.feedback.summary.is_empty() {
        println!("\n  Summary: {}", analysis.feedback.summary);
    }
    println!();
}

fn print_points(title: &str, points: &[FeedbackPoint]) {
    if points.is_empty() {
        return;
    }
    println!("\n  {}:", title);
    for point in points {
        println!("   • {}", point.point);
        if let Some(quote) = &point.quote {
            println!("       \"{}\"", quote);
        }
    }
}

pub fn print_history(records: &[SessionRecord]) {
    if records.is_empty() {
        println!("No past sessions yet.");
        return;
    }
    println!("{:<15} {:<13} {:>5}  {:<34} PRODUCT", "ID", "DATE", "SCORE", "PROSPECT");
    for record in records {
        println!(
            "{:<15} {:<13} {:>5}  {:<34} {}",
            record.id, record.date, record.score, record.prospect_role, record.product
        );
    }
}
