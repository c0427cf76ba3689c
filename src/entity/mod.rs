pub mod audit_logs;
pub mod cart_items;
pub mod coupon_courses;
pub mod coupon_usages;
pub mod coupons;
pub mod courses;
pub mod enrollments;
pub mod transactions;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use coupon_courses::Entity as CouponCourses;
pub use coupon_usages::Entity as CouponUsages;
pub use coupons::Entity as Coupons;
pub use courses::Entity as Courses;
pub use enrollments::Entity as Enrollments;
pub use transactions::Entity as Transactions;
pub use users::Entity as Users;
