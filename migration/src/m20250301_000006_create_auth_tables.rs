use sea_orm_migration::{prelude::*, schema::*};

use super::m20250301_000001_create_users::User;
use super::m20250301_000003_create_payments::Payment;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PasswordReset::Table)
                    .if_not_exists()
                    .col(uuid(PasswordReset::Nonce).primary_key())
                    .col(uuid(PasswordReset::UserId).not_null())
                    .col(timestamp_with_time_zone(PasswordReset::ExpiresAt).not_null())
                    .col(timestamp_with_time_zone_null(PasswordReset::ConsumedAt))
                    .col(
                        timestamp_with_time_zone(PasswordReset::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_password_reset_user")
                            .from(PasswordReset::Table, PasswordReset::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WebhookEvent::Table)
                    .if_not_exists()
                    .col(string_len(WebhookEvent::Id, 255).primary_key())
                    .col(uuid(WebhookEvent::PaymentId).not_null())
                    .col(
                        timestamp_with_time_zone(WebhookEvent::ReceivedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_webhook_event_payment")
                            .from(WebhookEvent::Table, WebhookEvent::PaymentId)
                            .to(Payment::Table, Payment::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_event_received_at")
                    .table(WebhookEvent::Table)
                    .col(WebhookEvent::ReceivedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WebhookEvent::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PasswordReset::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PasswordReset {
    Table,
    Nonce,
    UserId,
    ExpiresAt,
    ConsumedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WebhookEvent {
    Table,
    Id,
    PaymentId,
    ReceivedAt,
}
