use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::DomainEvent;
use keel_events::{
    EncodeEvent, Encoding, EventRegistry, EventVariant, RegistryError, SerializationError,
};

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: String,
    pub holder: String,
    pub version: u64,
    pub happened_on: DateTime<Utc>,
}

/// Event: AmountAdded. `balance` is the balance after the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountAdded {
    pub account_id: String,
    pub amount: i64,
    pub balance: i64,
    pub version: u64,
    pub happened_on: DateTime<Utc>,
}

/// Event: AmountWithdrawn. `amount` is positive; `balance` is the balance
/// after the withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountWithdrawn {
    pub account_id: String,
    pub amount: i64,
    pub balance: i64,
    pub version: u64,
    pub happened_on: DateTime<Utc>,
}

/// Event: AccountClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub account_id: String,
    pub version: u64,
    pub happened_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankEvent {
    AccountOpened(AccountOpened),
    AmountAdded(AmountAdded),
    AmountWithdrawn(AmountWithdrawn),
    AccountClosed(AccountClosed),
}

impl DomainEvent for BankEvent {
    fn aggregate_id(&self) -> &str {
        match self {
            BankEvent::AccountOpened(e) => &e.account_id,
            BankEvent::AmountAdded(e) => &e.account_id,
            BankEvent::AmountWithdrawn(e) => &e.account_id,
            BankEvent::AccountClosed(e) => &e.account_id,
        }
    }

    fn event_name(&self) -> &'static str {
        match self {
            BankEvent::AccountOpened(_) => AccountOpened::NAME,
            BankEvent::AmountAdded(_) => AmountAdded::NAME,
            BankEvent::AmountWithdrawn(_) => AmountWithdrawn::NAME,
            BankEvent::AccountClosed(_) => AccountClosed::NAME,
        }
    }

    fn version(&self) -> u64 {
        match self {
            BankEvent::AccountOpened(e) => e.version,
            BankEvent::AmountAdded(e) => e.version,
            BankEvent::AmountWithdrawn(e) => e.version,
            BankEvent::AccountClosed(e) => e.version,
        }
    }

    fn happened_on(&self) -> DateTime<Utc> {
        match self {
            BankEvent::AccountOpened(e) => e.happened_on,
            BankEvent::AmountAdded(e) => e.happened_on,
            BankEvent::AmountWithdrawn(e) => e.happened_on,
            BankEvent::AccountClosed(e) => e.happened_on,
        }
    }
}

impl EncodeEvent for BankEvent {
    fn encode_payload(&self, encoding: Encoding) -> Result<Vec<u8>, SerializationError> {
        match self {
            BankEvent::AccountOpened(e) => encoding.encode(e),
            BankEvent::AmountAdded(e) => encoding.encode(e),
            BankEvent::AmountWithdrawn(e) => encoding.encode(e),
            BankEvent::AccountClosed(e) => encoding.encode(e),
        }
    }
}

macro_rules! bank_variant {
    ($variant:ident) => {
        impl From<$variant> for BankEvent {
            fn from(value: $variant) -> Self {
                BankEvent::$variant(value)
            }
        }

        impl EventVariant<BankEvent> for $variant {
            const NAME: &'static str = stringify!($variant);
        }
    };
}

bank_variant!(AccountOpened);
bank_variant!(AmountAdded);
bank_variant!(AmountWithdrawn);
bank_variant!(AccountClosed);

/// Register every bank event with `registry`.
pub fn register_events(registry: &mut EventRegistry<BankEvent>) -> Result<(), RegistryError> {
    registry
        .register::<AccountOpened>()?
        .register::<AmountAdded>()?
        .register::<AmountWithdrawn>()?
        .register::<AccountClosed>()?;
    Ok(())
}

/// A registry holding exactly the bank events.
pub fn bank_registry() -> Result<EventRegistry<BankEvent>, RegistryError> {
    let mut registry = EventRegistry::new();
    register_events(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_variant_names() {
        let event = BankEvent::AmountAdded(AmountAdded {
            account_id: "acct-1".into(),
            amount: 50,
            balance: 50,
            version: 1,
            happened_on: Utc::now(),
        });
        assert_eq!(event.event_name(), "AmountAdded");
        assert_eq!(event.aggregate_id(), "acct-1");
        assert_eq!(DomainEvent::version(&event), 1);
    }

    #[test]
    fn registry_holds_all_four_events() {
        let registry = bank_registry().unwrap();
        assert_eq!(
            registry.names(),
            vec!["AccountClosed", "AccountOpened", "AmountAdded", "AmountWithdrawn"]
        );
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = bank_registry().unwrap();
        assert_eq!(
            register_events(&mut registry),
            Err(RegistryError::DuplicateEventName("AccountOpened"))
        );
    }
}
