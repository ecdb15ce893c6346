use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_courses_table::Migration),
            Box::new(m20240101_000002_create_profiles_table::Migration),
            Box::new(m20240101_000003_create_purchases_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_courses_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_courses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Courses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Courses::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Courses::Title).string().not_null())
                        .col(ColumnDef::new(Courses::Description).text().not_null())
                        .col(ColumnDef::new(Courses::Image).string().null())
                        .col(
                            ColumnDef::new(Courses::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Courses::DiscountedPrice).decimal().null())
                        .col(ColumnDef::new(Courses::Lessons).json().not_null())
                        .col(ColumnDef::new(Courses::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Courses::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Courses::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Courses {
        Table,
        Id,
        Title,
        Description,
        Image,
        Price,
        DiscountedPrice,
        Lessons,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_profiles_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_profiles_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Profiles::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Profiles::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Profiles::Email).string().not_null())
                        .col(ColumnDef::new(Profiles::FullName).string().null())
                        .col(
                            ColumnDef::new(Profiles::IsAdmin)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Profiles::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Profiles::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_profiles_email")
                        .table(Profiles::Table)
                        .col(Profiles::Email)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Profiles::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Profiles {
        Table,
        Id,
        Email,
        FullName,
        IsAdmin,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_purchases_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_purchases_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Purchases::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Purchases::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::UserId).uuid().not_null())
                        .col(ColumnDef::new(Purchases::CourseId).string().not_null())
                        .col(
                            ColumnDef::new(Purchases::PaymentReference)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            // Webhook redelivery safety hinges on this constraint: a replayed
            // notification re-inserts the same (user, course, payment) tuple
            // and must collide here rather than duplicate the entitlement.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_purchases_user_course_payment")
                        .table(Purchases::Table)
                        .col(Purchases::UserId)
                        .col(Purchases::CourseId)
                        .col(Purchases::PaymentReference)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // Loyalty lookup is a count-by-user query
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_user_id")
                        .table(Purchases::Table)
                        .col(Purchases::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_payment_reference")
                        .table(Purchases::Table)
                        .col(Purchases::PaymentReference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Purchases::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Purchases {
        Table,
        Id,
        UserId,
        CourseId,
        PaymentReference,
        CreatedAt,
    }
}
