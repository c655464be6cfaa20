use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;

use crate::models::{Poll, Question};

pub const INDEX: &str = "index";
pub const DETAIL: &str = "detail";
pub const RESULTS: &str = "results";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to register template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),
}

handlebars_helper!(pluralize: |count: i64| if count == 1 { "" } else { "s" });

#[derive(Serialize)]
pub struct IndexPage<'a> {
    pub questions: &'a [Question],
}

#[derive(Serialize)]
pub struct DetailPage<'a> {
    pub poll: &'a Poll,
    pub error_message: Option<&'a str>,
}

#[derive(Serialize)]
pub struct ResultsPage<'a> {
    pub poll: &'a Poll,
}

/**
 * The compiled page templates
 *
 * Templates are built into the binary, so a running server never depends on
 * its working directory.
 */
pub struct Templates {
    registry: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, Error> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(|text| html_escape::encode_safe(text).into_owned());
        registry.register_helper("pluralize", Box::new(pluralize));

        registry.register_template_string(INDEX, include_str!("../templates/index.hbs"))?;
        registry.register_template_string(DETAIL, include_str!("../templates/detail.hbs"))?;
        registry.register_template_string(RESULTS, include_str!("../templates/results.hbs"))?;

        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, Error> {
        Ok(self.registry.render(name, data)?)
    }
}
