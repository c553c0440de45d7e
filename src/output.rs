use console::Style;

use crate::mutants::{Mutant, Verdict};
use crate::state::{RunRecord, SurvivedMutant};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

/// One line per generated mutant, as `mutator list` prints them.
pub fn print_mutants(mutants: &[Mutant]) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();
    for m in mutants {
        let note = match &m.ignore_reason {
            Some(reason) => format!(" ({})", reason),
            None => String::new(),
        };
        println!(
            "  {} {}:{}:{} {}{}",
            ref_style.apply_to(format!("@{}", m.id)),
            m.location.file,
            m.location.span.line,
            m.location.span.column,
            m.display_name,
            dim.apply_to(note),
        );
    }
}

pub fn print_run_result(record: &RunRecord) {
    let summary = &record.summary;
    let seconds = record.duration_ms as f64 / 1000.0;

    if summary.survived == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {} scored mutants, none survived ({} score) in {:.1}s",
            style.apply_to("✓"),
            summary.scored(),
            summary.score_label(),
            seconds,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {} survived / {} scored ({} score) in {:.1}s",
            style.apply_to("!"),
            summary.survived,
            summary.scored(),
            summary.score_label(),
            seconds,
        );
    }

    let dim = Style::new().dim();
    for (count, verdict) in [
        (summary.timeout, Verdict::Timeout),
        (summary.runtime_error, Verdict::RuntimeError),
        (summary.not_covered, Verdict::NotCovered),
        (summary.ignored, Verdict::Ignored),
    ] {
        if count > 0 {
            println!("  {} {} {}", dim.apply_to("·"), count, verdict.label());
        }
    }

    if record.survived_mutants.is_empty() {
        return;
    }
    println!();
    let ref_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();
    let op_style = Style::new().magenta();
    for m in &record.survived_mutants {
        println!(
            "  {} {}:{} {} {} → {}",
            ref_style.apply_to(format!("@{}", m.id)),
            m.file,
            m.line,
            loc_style.apply_to(format!("[{}]", m.kind.display_label())),
            op_style.apply_to(&m.original),
            op_style.apply_to(&m.replacement),
        );
    }
}

pub fn print_mutant_detail(m: &SurvivedMutant) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}:{} {}",
        ref_style.apply_to(format!("@{}", m.id)),
        m.file,
        m.line,
        m.display_name,
    );
    println!();

    for line in &m.context_before {
        println!("  {}", dim.apply_to(line));
    }
    for line in m.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }
    for line in &m.context_after {
        println!("  {}", dim.apply_to(line));
    }
}

pub fn print_status(record: &RunRecord) {
    let summary = &record.summary;
    println!(
        "Last run {}: {} mutants, {} killed, {} survived ({} score)",
        record.run_id,
        summary.total,
        summary.killed,
        summary.survived,
        summary.score_label(),
    );

    if !record.survived_mutants.is_empty() {
        println!();
        let ref_style = Style::new().cyan().bold();
        for m in &record.survived_mutants {
            println!(
                "  {} {}:{} {} → {}",
                ref_style.apply_to(format!("@{}", m.id)),
                m.file,
                m.line,
                m.original,
                m.replacement,
            );
        }
        println!();
        println!("Use `mutator show @m1` for details on a specific mutant.");
    }
}
