use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub currency: String,
    pub stripe_secret_key: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let currency = env::var("CURRENCY").unwrap_or_else(|_| "usd".to_string());
        let stripe_secret_key = env::var("STRIPE_SECRET_KEY")?;
        let checkout_success_url = env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "http://localhost:3000/checkout/success".to_string());
        let checkout_cancel_url = env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "http://localhost:3000/cart".to_string());
        Ok(Self {
            port,
            database_url,
            host,
            currency,
            stripe_secret_key,
            checkout_success_url,
            checkout_cancel_url,
        })
    }
}
