use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "payment_status")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        matches!(
            (self, next),
            (Unpaid, Pending | Paid | Failed)
                | (Pending, Paid | Failed)
                | (Failed, Pending | Paid)
                | (Paid, Refunded)
        )
    }

    /// Statuses that can no longer move forward on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: PaymentStatus,
    #[sea_orm(column_name = "type")]
    #[serde(rename = "type")]
    pub pay_type: Option<String>,
    pub pay_date: Option<DateTimeWithTimeZone>,
    /// Reservation window the payment was opened for, so a webhook can be
    /// matched to a booking created afterwards.
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::booking::Entity")]
    Booking,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::PaymentStatus::*;

    #[test]
    fn test_paid_only_moves_to_refunded() {
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Paid.can_transition_to(Unpaid));
    }

    #[test]
    fn test_refunded_is_final() {
        for next in [Unpaid, Pending, Paid, Failed] {
            assert!(!Refunded.can_transition_to(next));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(Failed.is_terminal());
        assert!(Refunded.is_terminal());
        assert!(!Paid.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Unpaid.is_terminal());
    }

    #[test]
    fn test_failed_payment_can_be_retried() {
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Paid));
        assert!(!Unpaid.can_transition_to(Refunded));
    }
}
