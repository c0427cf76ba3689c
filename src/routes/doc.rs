use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{CartItemDto, CartList},
        checkout::{CheckoutData, CheckoutRequest, ConfirmationData, PaymentMethod},
        coupons::{ApplyCouponRequest, CouponApplyData, CouponWithCourses},
        courses::{CourseList, EnrollmentDto},
    },
    models::{CartItem, Coupon, Course, DiscountType, Transaction, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, checkout, coupons, courses, health, params},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        courses::list_courses,
        courses::get_course,
        courses::enroll_free,
        courses::create_course,
        courses::update_course,
        courses::delete_course,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        coupons::apply_coupon,
        coupons::remove_coupon,
        checkout::checkout,
        checkout::confirm_payment,
        admin::create_coupon,
        admin::list_coupons,
        admin::update_coupon,
        admin::delete_coupon,
        admin::list_transactions,
        admin::update_transaction_status
    ),
    components(
        schemas(
            User,
            Course,
            CartItem,
            Coupon,
            DiscountType,
            Transaction,
            CourseList,
            EnrollmentDto,
            CartList,
            CartItemDto,
            ApplyCouponRequest,
            CouponApplyData,
            CouponWithCourses,
            CheckoutRequest,
            CheckoutData,
            ConfirmationData,
            PaymentMethod,
            admin::CouponList,
            admin::TransactionList,
            admin::CreateCouponRequest,
            admin::UpdateCouponRequest,
            admin::UpdateTransactionStatusRequest,
            params::Pagination,
            params::CourseQuery,
            params::TransactionListQuery,
            Meta,
            ApiResponse<Course>,
            ApiResponse<CourseList>,
            ApiResponse<CouponApplyData>,
            ApiResponse<CheckoutData>,
            ApiResponse<ConfirmationData>,
            ApiResponse<admin::TransactionList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Courses", description = "Course catalog and enrollment endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Coupons", description = "Coupon apply and remove endpoints"),
        (name = "Checkout", description = "Checkout and payment confirmation endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
