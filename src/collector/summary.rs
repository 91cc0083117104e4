use std::collections::BTreeMap;

use crate::upstream::types::Transaction;

/// Sum of today's transaction amounts for one `(category, description)` pair of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub category: String,
    pub description: String,
    pub amount: i64,
}

/// Groups transactions by `(category, description)` and sums their amounts.
/// With `skip_declined` set, transactions carrying a decline reason are left out.
pub fn summarize_transactions(transactions: &[Transaction], skip_declined: bool) -> Vec<TransactionSummary> {
    let mut groups: BTreeMap<(&str, &str), i64> = BTreeMap::new();

    for tx in transactions.iter().filter(|tx| !(skip_declined && tx.is_declined())) {
        *groups
            .entry((tx.category.as_str(), tx.description.as_str()))
            .or_insert(0) += tx.amount;
    }

    groups
        .into_iter()
        .map(|((category, description), amount)| TransactionSummary {
            category: category.to_owned(),
            description: description.to_owned(),
            amount,
        })
        .collect()
}
