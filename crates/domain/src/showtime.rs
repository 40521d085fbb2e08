//! Showtime as seen by the reservation core.

use common::ShowtimeId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::reservation::{Currency, Money, Quantity};

/// A screening with a fixed ticket capacity and unit price.
///
/// Owned by the catalog; the core reads it but never edits it, and treats
/// `total_tickets` as immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Showtime {
    pub id: ShowtimeId,
    pub total_tickets: u32,
    pub ticket_price: Money,
    pub currency: Currency,
}

impl Showtime {
    /// Creates a showtime, validating capacity and price.
    pub fn new(
        id: ShowtimeId,
        total_tickets: u32,
        ticket_price: Money,
        currency: Currency,
    ) -> Result<Self, DomainError> {
        if total_tickets == 0 {
            return Err(DomainError::InvalidCapacity { total_tickets });
        }
        if ticket_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                cents: ticket_price.cents(),
            });
        }
        Ok(Self {
            id,
            total_tickets,
            ticket_price,
            currency,
        })
    }

    /// Returns the price of `quantity` tickets.
    pub fn amount_due(&self, quantity: Quantity) -> Result<Money, DomainError> {
        self.ticket_price
            .checked_multiply(quantity.get())
            .ok_or(DomainError::AmountOverflow)
    }
}
