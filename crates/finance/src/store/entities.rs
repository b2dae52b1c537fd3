/// 사용자 엔티티 모듈
pub mod user {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = true)]
        pub id: i64,

        /// 로그인 이름 (유일, 생성 후 변경 불가)
        #[sea_orm(column_type = "Text", unique)]
        pub username: String,

        /// Argon2 PHC 문자열
        #[sea_orm(column_type = "Text")]
        pub hash: String,

        /// 보유 현금 (Decimal 문자열)
        #[sea_orm(column_type = "Text")]
        pub cash: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::share::Entity")]
        Share,
        #[sea_orm(has_many = "super::history::Entity")]
        History,
    }

    impl Related<super::share::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Share.def()
        }
    }

    impl Related<super::history::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::History.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// 보유 종목 엔티티 모듈 (사용자+심볼 당 1행)
pub mod share {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "shares")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = true)]
        pub id: i64,

        pub user_id: i64,

        #[sea_orm(column_type = "Text")]
        pub symbol: String,

        /// 보유 수량
        pub share_count: i64,

        /// 누적 취득 원가 (Decimal 문자열)
        #[sea_orm(column_type = "Text")]
        pub total_cost: String,

        /// 최초 매수 UTC 시간 (ISO 8601 형식)
        #[sea_orm(column_type = "Text")]
        pub created_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::user::Entity",
            from = "Column::UserId",
            to = "super::user::Column::Id"
        )]
        User,
    }

    impl Related<super::user::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// 거래 내역 엔티티 모듈 (추가 전용)
pub mod history {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "history")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = true)]
        pub id: i64,

        pub user_id: i64,

        #[sea_orm(column_type = "Text")]
        pub symbol: String,

        pub share_count: i64,

        /// 체결 가격 (Decimal 문자열)
        #[sea_orm(column_type = "Text")]
        pub price: String,

        /// 거래 방향 (BUY, SELL)
        #[sea_orm(column_type = "Text")]
        pub status: String,

        /// 체결 UTC 시간 (ISO 8601 형식)
        #[sea_orm(column_type = "Text")]
        pub timestamp: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::user::Entity",
            from = "Column::UserId",
            to = "super::user::Column::Id"
        )]
        User,
    }

    impl Related<super::user::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
