use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RefreshHistory::Table)
                    .if_not_exists()
                    .col(pk_auto(RefreshHistory::Id))
                    .col(big_integer(RefreshHistory::RefreshedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_refresh_history_refreshed_at")
                    .table(RefreshHistory::Table)
                    .col(RefreshHistory::RefreshedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(RefreshHistory::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum RefreshHistory {
    Table,
    Id,
    RefreshedAt,
}
