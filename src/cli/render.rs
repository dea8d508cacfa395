//! Terminal rendering of replies and underwriting outcomes

use console::Style;

use loanflow_core::underwriting::{format_rupees, DecisionOutcome, Verdict};
use loanflow_core::Reply;

pub fn print_user(message: &str) {
    let you = Style::new().green().bold();
    println!("{} {}", you.apply_to("you>"), message);
}

pub fn print_reply(reply: &Reply) {
    let bot = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!("{} {}", bot.apply_to("loanflow>"), reply.text);
    for option in &reply.options {
        println!("    {} {}", dim.apply_to("-"), option);
    }
    if let Some(error) = &reply.error {
        log::debug!("reply carried error: {}", error);
    }
    println!("{}", dim.apply_to(format!("[stage: {}]", reply.stage)));
    println!();
}

pub fn print_outcome(outcome: &DecisionOutcome) {
    let (label, style) = match outcome.verdict() {
        Verdict::Approved => ("APPROVED", Style::new().green().bold()),
        Verdict::NeedsIncomeProof => ("INCOME PROOF REQUIRED", Style::new().yellow().bold()),
        Verdict::Rejected => ("REJECTED", Style::new().red().bold()),
    };
    println!("{}", style.apply_to(label));
    println!("  Reason:          {}", outcome.reason);
    println!("  Amount:          ₹{}", format_rupees(outcome.amount));
    if outcome.emi > 0.0 {
        println!("  Rate:            {}% p.a.", outcome.interest_rate);
        println!(
            "  EMI:             ₹{} x {} months",
            format_rupees(outcome.emi),
            outcome.tenure_months
        );
        println!("  Processing fee:  ₹{}", format_rupees(outcome.processing_fee));
        println!("  Total repayment: ₹{}", format_rupees(outcome.total_repayment));
        println!("  Total interest:  ₹{}", format_rupees(outcome.total_interest));
    }
    if let Some(suggested) = outcome.suggested_amount {
        println!("  Suggested:       ₹{}", format_rupees(suggested));
    }
}
