use std::sync::Arc;
use tera::Tera;

use polly_core::app::Service;

const DASHBOARD_TEMPLATE: &str = include_str!("../../templates/poll_dashboard.html.tera");

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub templates: Arc<Tera>,
}

impl AppState {
    pub fn new(service: Arc<Service>) -> Self {
        let mut tera = Tera::default();
        tera.add_raw_template("poll_dashboard.html", DASHBOARD_TEMPLATE)
            .expect("dashboard template must parse");
        Self { service, templates: Arc::new(tera) }
    }
}
