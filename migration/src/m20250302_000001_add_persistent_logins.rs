use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per remembered device; the series never changes, the token rotates
        manager
            .create_table(
                Table::create()
                    .table(PersistentLogins::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PersistentLogins::Series)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(PersistentLogins::Subject))
                    .col(string(PersistentLogins::Token))
                    .col(big_integer(PersistentLogins::LastUsed))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_persistent_logins_subject")
                    .table(PersistentLogins::Table)
                    .col(PersistentLogins::Subject)
                    .to_owned(),
            )
            .await?;

        // Sweeps filter on last_used
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_persistent_logins_last_used")
                    .table(PersistentLogins::Table)
                    .col(PersistentLogins::LastUsed)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PersistentLogins::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PersistentLogins {
    Table,
    Series,
    Subject,
    Token,
    LastUsed,
}
