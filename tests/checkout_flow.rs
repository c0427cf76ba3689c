use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum_elearning_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::AddToCartRequest,
        checkout::{
            AppliedCoupon, CheckoutCartItem, CheckoutRequest, ConfirmQuery, PaymentMethod,
        },
        coupons::{ApplyCouponCartItem, ApplyCouponRequest},
    },
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        coupon_courses,
        coupon_usages::{Column as UsageCol, Entity as CouponUsages},
        coupons::{ActiveModel as CouponActive, Entity as Coupons},
        courses::{ActiveModel as CourseActive, Model as CourseModel},
        enrollments::{Column as EnrollCol, Entity as Enrollments},
        transactions::{Column as TxnCol, Entity as Transactions},
        users::{ActiveModel as UserActive, Entity as Users},
    },
    error::AppError,
    gateway::{
        CheckoutSession, CreateSessionRequest, GatewayError, PaymentGateway, SessionStatus,
    },
    middleware::auth::AuthUser,
    routes::admin::UpdateTransactionStatusRequest,
    services::{admin_service, cart_service, checkout_service, coupon_service},
    state::AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Set, Statement,
};
use uuid::Uuid;

/// Gateway double: sessions always open, paid-ness is switchable.
struct MockGateway {
    paid: AtomicBool,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            paid: AtomicBool::new(true),
        }
    }

    fn set_paid(&self, paid: bool) {
        self.paid.store(paid, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        Ok(CheckoutSession {
            id: format!("cs_test_{}", request.correlation_id),
            url: format!("https://pay.example/session/{}", request.correlation_id),
        })
    }

    async fn verify_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        Ok(SessionStatus {
            id: session_id.to_string(),
            paid: self.paid.load(Ordering::SeqCst),
        })
    }
}

// Integration flow: cart -> coupon apply -> offline checkout -> admin
// settlement, then online checkout -> idempotent confirmation, plus the
// all-or-nothing and coupon rejection paths.
#[tokio::test]
async fn cart_coupon_checkout_and_confirmation_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let gateway = Arc::new(MockGateway::new());
    let state = setup_state(&database_url, gateway.clone()).await?;

    // Seed catalog: two published paid courses, one draft.
    let course_a = create_course(&state, "Rust Fundamentals", dec!(100), None, "published").await?;
    let course_b = create_course(&state, "SQL Deep Dive", dec!(50), None, "published").await?;
    let course_draft = create_course(&state, "Unreleased", dec!(30), None, "draft").await?;

    // Fixed $20 coupon restricted to course A.
    let save20 = create_coupon(
        &state,
        "SAVE20",
        "fixed",
        dec!(20),
        None,
        0,
        &[course_a.id],
    )
    .await?;

    let user1 = create_user(&state, "user", "buyer1@example.com").await?;
    let auth1 = AuthUser {
        user_id: user1,
        role: "user".into(),
    };
    let admin_id = create_user(&state, "admin", "admin@example.com").await?;
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    // --- Offline checkout with a coupon -------------------------------

    cart_service::add_to_cart(
        &state.pool,
        &auth1,
        AddToCartRequest {
            course_id: course_a.id,
        },
    )
    .await?;
    cart_service::add_to_cart(
        &state.pool,
        &auth1,
        AddToCartRequest {
            course_id: course_b.id,
        },
    )
    .await?;

    let apply_resp = coupon_service::apply_coupon(
        &state,
        &auth1,
        ApplyCouponRequest {
            code: "save20".into(),
            cart_items: vec![
                ApplyCouponCartItem {
                    course_id: course_a.id,
                    price: dec!(100),
                    current_price: dec!(100),
                },
                ApplyCouponCartItem {
                    course_id: course_b.id,
                    price: dec!(50),
                    current_price: dec!(50),
                },
            ],
            cart_total: dec!(150),
        },
    )
    .await?;
    assert!(apply_resp.success);
    let apply_data = apply_resp.data.unwrap();
    assert_eq!(apply_data.discount_amount, dec!(20));
    assert_eq!(apply_data.final_total, dec!(130));

    let checkout_resp = checkout_service::checkout(
        &state,
        &auth1,
        CheckoutRequest {
            cart_items: vec![
                CheckoutCartItem {
                    course_id: course_a.id,
                },
                CheckoutCartItem {
                    course_id: course_b.id,
                },
            ],
            applied_coupon: Some(AppliedCoupon {
                code: "SAVE20".into(),
            }),
            payment_method: PaymentMethod::Offline,
        },
    )
    .await?;
    let offline_data = checkout_resp.data.unwrap();
    assert_eq!(offline_data.amount, dec!(130));
    assert!(offline_data.session_id.is_none());

    let txns = Transactions::find()
        .filter(TxnCol::UserId.eq(user1))
        .all(&state.orm)
        .await?;
    assert_eq!(txns.len(), 2);
    for txn in &txns {
        // Pending with a completion timestamp: awaiting manual confirmation.
        assert_eq!(txn.status, "pending");
        assert!(txn.completed_at.is_some());
        assert_eq!(txn.payment_method, "offline");
    }

    let enrollments = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user1))
        .all(&state.orm)
        .await?;
    assert_eq!(enrollments.len(), 2);
    assert!(enrollments.iter().all(|e| !e.is_paid));

    let cart_count = CartItems::find()
        .filter(CartCol::UserId.eq(user1))
        .count(&state.orm)
        .await?;
    assert_eq!(cart_count, 0);

    let coupon = Coupons::find_by_id(save20)
        .one(&state.orm)
        .await?
        .expect("coupon");
    assert_eq!(coupon.times_used, 1);

    let usages = CouponUsages::find()
        .filter(UsageCol::CouponId.eq(save20))
        .all(&state.orm)
        .await?;
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].user_id, user1);
    assert_eq!(usages[0].transaction_id, offline_data.transaction_id);

    // Same user, same coupon: rejected for good.
    let reuse = coupon_service::apply_coupon(
        &state,
        &auth1,
        ApplyCouponRequest {
            code: "SAVE20".into(),
            cart_items: vec![ApplyCouponCartItem {
                course_id: course_a.id,
                price: dec!(100),
                current_price: dec!(100),
            }],
            cart_total: dec!(100),
        },
    )
    .await?;
    assert!(!reuse.success);
    assert_eq!(reuse.message, "You have already used this coupon");
    let reuse_data = reuse.data.unwrap();
    assert_eq!(reuse_data.discount_amount, Decimal::ZERO);
    assert_eq!(reuse_data.final_total, dec!(100));

    // --- Admin settles one offline transaction ------------------------

    let settled = admin_service::update_transaction_status(
        &state,
        &auth_admin,
        offline_data.transaction_id,
        UpdateTransactionStatusRequest {
            status: "completed".into(),
        },
    )
    .await?;
    let settled = settled.data.unwrap();
    assert_eq!(settled.status, "completed");

    let settled_enrollment = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user1))
        .filter(EnrollCol::CourseId.eq(settled.course_id))
        .one(&state.orm)
        .await?
        .expect("enrollment");
    assert!(settled_enrollment.is_paid);
    assert_eq!(settled_enrollment.paid_amount, Some(settled.amount));

    let user1_row = Users::find_by_id(user1).one(&state.orm).await?.unwrap();
    assert_eq!(user1_row.points, 50);

    // --- Online checkout and idempotent confirmation ------------------

    let course_c = create_course(
        &state,
        "Distributed Systems",
        dec!(90),
        Some(dec!(80)),
        "published",
    )
    .await?;
    let user2 = create_user(&state, "user", "buyer2@example.com").await?;
    let auth2 = AuthUser {
        user_id: user2,
        role: "user".into(),
    };

    cart_service::add_to_cart(
        &state.pool,
        &auth2,
        AddToCartRequest {
            course_id: course_c.id,
        },
    )
    .await?;

    let online_resp = checkout_service::checkout(
        &state,
        &auth2,
        CheckoutRequest {
            cart_items: vec![CheckoutCartItem {
                course_id: course_c.id,
            }],
            applied_coupon: None,
            payment_method: PaymentMethod::Stripe,
        },
    )
    .await?;
    let online_data = online_resp.data.unwrap();
    assert_eq!(online_data.amount, dec!(80));
    let session_id = online_data.session_id.clone().expect("session id");
    assert!(online_data.session_url.is_some());

    // No enrollments and an uncleared cart until the payment settles.
    let pending = Transactions::find()
        .filter(TxnCol::UserId.eq(user2))
        .all(&state.orm)
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, "pending");
    assert!(pending[0].completed_at.is_none());
    assert_eq!(
        Enrollments::find()
            .filter(EnrollCol::UserId.eq(user2))
            .count(&state.orm)
            .await?,
        0
    );
    assert_eq!(
        CartItems::find()
            .filter(CartCol::UserId.eq(user2))
            .count(&state.orm)
            .await?,
        1
    );

    let confirm = checkout_service::confirm_payment(
        &state,
        &auth2,
        ConfirmQuery {
            session_id: session_id.clone(),
            transaction_id: online_data.transaction_id,
        },
    )
    .await?;
    let confirm_data = confirm.data.unwrap();
    assert!(!confirm_data.already_processed);
    assert_eq!(confirm_data.transactions, 1);
    assert_eq!(confirm_data.enrollments, 1);

    let enrollment = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user2))
        .filter(EnrollCol::CourseId.eq(course_c.id))
        .one(&state.orm)
        .await?
        .expect("enrollment");
    assert!(enrollment.is_paid);
    assert_eq!(enrollment.paid_amount, Some(dec!(80)));
    assert_eq!(
        CartItems::find()
            .filter(CartCol::UserId.eq(user2))
            .count(&state.orm)
            .await?,
        0
    );
    let user2_row = Users::find_by_id(user2).one(&state.orm).await?.unwrap();
    assert_eq!(user2_row.points, 50);

    // Second confirmation is a no-op.
    let again = checkout_service::confirm_payment(
        &state,
        &auth2,
        ConfirmQuery {
            session_id,
            transaction_id: online_data.transaction_id,
        },
    )
    .await?;
    let again_data = again.data.unwrap();
    assert!(again_data.already_processed);
    assert_eq!(again_data.transactions, 0);
    assert_eq!(again_data.enrollments, 0);
    let user2_row = Users::find_by_id(user2).one(&state.orm).await?.unwrap();
    assert_eq!(user2_row.points, 50);

    // --- Unpaid session leaves everything pending ---------------------

    let user3 = create_user(&state, "user", "buyer3@example.com").await?;
    let auth3 = AuthUser {
        user_id: user3,
        role: "user".into(),
    };
    cart_service::add_to_cart(
        &state.pool,
        &auth3,
        AddToCartRequest {
            course_id: course_b.id,
        },
    )
    .await?;
    let unpaid_resp = checkout_service::checkout(
        &state,
        &auth3,
        CheckoutRequest {
            cart_items: vec![CheckoutCartItem {
                course_id: course_b.id,
            }],
            applied_coupon: None,
            payment_method: PaymentMethod::Stripe,
        },
    )
    .await?;
    let unpaid_data = unpaid_resp.data.unwrap();

    gateway.set_paid(false);
    let err = checkout_service::confirm_payment(
        &state,
        &auth3,
        ConfirmQuery {
            session_id: unpaid_data.session_id.clone().expect("session id"),
            transaction_id: unpaid_data.transaction_id,
        },
    )
    .await
    .expect_err("unpaid session must be rejected");
    assert!(matches!(err, AppError::BadRequest(_)));
    gateway.set_paid(true);

    let still_pending = Transactions::find()
        .filter(TxnCol::UserId.eq(user3))
        .all(&state.orm)
        .await?;
    assert!(still_pending.iter().all(|t| t.status == "pending"));
    assert_eq!(
        Enrollments::find()
            .filter(EnrollCol::UserId.eq(user3))
            .count(&state.orm)
            .await?,
        0
    );

    // --- Checkout is all-or-nothing -----------------------------------

    let user4 = create_user(&state, "user", "buyer4@example.com").await?;
    let auth4 = AuthUser {
        user_id: user4,
        role: "user".into(),
    };

    let err = checkout_service::checkout(
        &state,
        &auth4,
        CheckoutRequest {
            cart_items: vec![
                CheckoutCartItem {
                    course_id: course_b.id,
                },
                CheckoutCartItem {
                    course_id: course_draft.id,
                },
            ],
            applied_coupon: None,
            payment_method: PaymentMethod::Offline,
        },
    )
    .await
    .expect_err("draft course must fail the whole checkout");
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(
        Transactions::find()
            .filter(TxnCol::UserId.eq(user4))
            .count(&state.orm)
            .await?,
        0
    );

    let err = checkout_service::checkout(
        &state,
        &auth2,
        CheckoutRequest {
            cart_items: vec![CheckoutCartItem {
                course_id: course_c.id,
            }],
            applied_coupon: None,
            payment_method: PaymentMethod::Offline,
        },
    )
    .await
    .expect_err("owned course must fail the whole checkout");
    assert!(matches!(err, AppError::Conflict(_)));

    // --- Remaining coupon rejections ----------------------------------

    // Usage limit exhausted by someone else.
    let _cap1 = create_coupon(&state, "CAP1", "percentage", dec!(10), Some(1), 1, &[]).await?;
    let capped = coupon_service::apply_coupon(
        &state,
        &auth4,
        ApplyCouponRequest {
            code: "CAP1".into(),
            cart_items: vec![ApplyCouponCartItem {
                course_id: course_b.id,
                price: dec!(50),
                current_price: dec!(50),
            }],
            cart_total: dec!(50),
        },
    )
    .await?;
    assert!(!capped.success);
    assert_eq!(capped.message, "Coupon usage limit reached");

    // Restricted coupon against a cart with none of its courses.
    let inapplicable = coupon_service::apply_coupon(
        &state,
        &auth4,
        ApplyCouponRequest {
            code: "SAVE20".into(),
            cart_items: vec![ApplyCouponCartItem {
                course_id: course_b.id,
                price: dec!(50),
                current_price: dec!(50),
            }],
            cart_total: dec!(50),
        },
    )
    .await?;
    assert!(!inapplicable.success);
    assert_eq!(
        inapplicable.message,
        "Coupon not applicable to any course in your cart"
    );
    assert_eq!(inapplicable.data.unwrap().discount_amount, Decimal::ZERO);

    Ok(())
}

async fn setup_state(
    database_url: &str,
    gateway: Arc<MockGateway>,
) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE coupon_usages, coupon_courses, transactions, enrollments, cart_items, coupons, audit_logs, courses, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    Ok(AppState {
        pool,
        orm,
        gateway,
        currency: "usd".to_string(),
    })
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        points: Set(0),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_course(
    state: &AppState,
    title: &str,
    price: Decimal,
    discount_price: Option<Decimal>,
    status: &str,
) -> anyhow::Result<CourseModel> {
    let course = CourseActive {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        description: Set(None),
        price: Set(price),
        discount_price: Set(discount_price),
        status: Set(status.to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(course)
}

async fn create_coupon(
    state: &AppState,
    code: &str,
    discount_type: &str,
    discount_value: Decimal,
    usage_limit: Option<i32>,
    times_used: i32,
    applicable: &[Uuid],
) -> anyhow::Result<Uuid> {
    let now = Utc::now();
    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        discount_type: Set(discount_type.to_string()),
        discount_value: Set(discount_value),
        valid_from: Set((now - Duration::hours(1)).into()),
        valid_until: Set((now + Duration::days(30)).into()),
        usage_limit: Set(usage_limit),
        times_used: Set(times_used),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    for course_id in applicable {
        coupon_courses::ActiveModel {
            coupon_id: Set(coupon.id),
            course_id: Set(*course_id),
        }
        .insert(&state.orm)
        .await?;
    }

    Ok(coupon.id)
}
