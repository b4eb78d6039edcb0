use anyhow::Result;
use std::io::Write;

use crate::domain::{LoanPayment, Transaction, format_cents};

/// Write an account's transactions as CSV, one row per record.
///
/// Amounts are written both as raw cents and as decimal strings.
pub fn export_transactions_csv<W: Write>(transactions: &[Transaction], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "id",
        "sequence",
        "account_id",
        "kind",
        "amount_cents",
        "amount",
        "balance_cents",
        "balance",
        "created_at",
    ])?;

    for tx in transactions {
        csv_writer.write_record(&[
            tx.id.to_string(),
            tx.sequence.to_string(),
            tx.account_id.to_string(),
            tx.kind.as_str().to_string(),
            tx.amount.to_string(),
            format_cents(tx.amount),
            tx.balance.to_string(),
            format_cents(tx.balance),
            tx.created_at.to_rfc3339(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(transactions.len())
}

pub fn export_transactions_json<W: Write>(
    transactions: &[Transaction],
    mut writer: W,
) -> Result<usize> {
    let json = serde_json::to_string_pretty(transactions)?;
    writeln!(writer, "{}", json)?;
    Ok(transactions.len())
}

pub fn export_payments_csv<W: Write>(payments: &[LoanPayment], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(["id", "loan_id", "amount_cents", "amount", "payment_date"])?;
    for payment in payments {
        csv_writer.write_record(&[
            payment.id.to_string(),
            payment.loan_id.to_string(),
            payment.amount.to_string(),
            format_cents(payment.amount),
            payment.payment_date.to_rfc3339(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(payments.len())
}

pub fn export_payments_json<W: Write>(payments: &[LoanPayment], mut writer: W) -> Result<usize> {
    let json = serde_json::to_string_pretty(payments)?;
    writeln!(writer, "{}", json)?;
    Ok(payments.len())
}
