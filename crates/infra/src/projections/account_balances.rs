use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keel_bank::BankEvent;
use keel_core::DomainEvent;
use keel_events::Projection;

/// Queryable read model: current balance per open account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub holder: String,
    pub balance: i64,
    /// Stream version of the last event folded for this account.
    pub version: u64,
}

/// Account balances projection.
///
/// Inserts on `AccountOpened`, tracks the balance carried by
/// `AmountAdded`/`AmountWithdrawn`, and forgets the account on
/// `AccountClosed`. The view is sorted by account id.
#[derive(Debug, Default)]
pub struct AccountBalancesProjection {
    accounts: BTreeMap<String, AccountBalance>,
}

impl AccountBalancesProjection {
    pub fn get(&self, account_id: &str) -> Option<&AccountBalance> {
        self.accounts.get(account_id)
    }
}

impl Projection for AccountBalancesProjection {
    type Event = BankEvent;
    type View = Vec<AccountBalance>;

    fn handle(&mut self, event: &BankEvent) {
        match event {
            BankEvent::AccountOpened(e) => {
                self.accounts.insert(
                    e.account_id.clone(),
                    AccountBalance {
                        account_id: e.account_id.clone(),
                        holder: e.holder.clone(),
                        balance: 0,
                        version: e.version,
                    },
                );
            }
            BankEvent::AmountAdded(e) => {
                if let Some(row) = self.accounts.get_mut(&e.account_id) {
                    row.balance = e.balance;
                    row.version = event.version();
                }
            }
            BankEvent::AmountWithdrawn(e) => {
                if let Some(row) = self.accounts.get_mut(&e.account_id) {
                    row.balance = e.balance;
                    row.version = event.version();
                }
            }
            BankEvent::AccountClosed(e) => {
                self.accounts.remove(&e.account_id);
            }
        }
    }

    fn view(&self) -> Vec<AccountBalance> {
        self.accounts.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use keel_bank::Account;

    use super::*;

    #[test]
    fn folds_an_account_lifecycle() {
        let mut account = Account::new("acct-1");
        account.open("Ada", Utc::now()).unwrap();
        account.deposit(50, Utc::now()).unwrap();
        account.withdraw(30, Utc::now()).unwrap();

        let mut projection = AccountBalancesProjection::default();
        for event in account.events() {
            projection.handle(&event);
        }
        assert_eq!(
            projection.view(),
            vec![AccountBalance {
                account_id: "acct-1".into(),
                holder: "Ada".into(),
                balance: 20,
                version: 2,
            }]
        );

        account.withdraw(20, Utc::now()).unwrap();
        account.close(Utc::now()).unwrap();
        for event in &account.events()[3..] {
            projection.handle(event);
        }
        assert!(projection.view().is_empty());
    }

    #[test]
    fn view_is_sorted_by_account_id() {
        let mut projection = AccountBalancesProjection::default();
        for id in ["c", "a", "b"] {
            let mut account = Account::new(id);
            account.open("x", Utc::now()).unwrap();
            projection.handle(&account.events()[0]);
        }

        let ids: Vec<_> = projection.view().into_iter().map(|b| b.account_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(projection.get("b").is_some());
    }
}
