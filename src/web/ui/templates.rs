use askama::Template;
use askama_web::WebTemplate;

#[derive(Template, WebTemplate)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub interval_seconds: u64,
    pub backend: String,
    pub total: usize,
    pub latest: Option<String>,
}

#[derive(Template, WebTemplate)]
#[template(path = "database.html")]
pub struct DatabaseTemplate {
    pub days: Vec<DayOption>,
    pub per_page: usize,
}

pub struct DayOption {
    pub value: String,
    pub label: String,
    pub count: usize,
}
