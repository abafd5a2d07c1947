#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Pure HTML extraction helpers for the platform and identity-provider pages.
//!
//! Every function here takes page source and returns owned data, so parsed
//! documents never live across an `.await`.

use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};

/// A login form found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Raw `action` attribute, possibly relative. Empty when absent.
    pub action: String,
    /// Every named `<input>` with its pre-filled value, in document order.
    pub fields: Vec<(String, String)>,
}

impl LoginForm {
    /// Returns the value of the named field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Inserts or replaces a field, keeping the original position when it
    /// already exists.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }
}

/// One row of the grading table, reduced to the two cells that matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Trimmed text of the student name cell.
    pub student:   String,
    /// Whether the row had a file-submission cell at all.
    pub file_cell: bool,
    /// `href` of the first link inside the file cell.
    pub file_link: Option<String>,
}

/// Parses a CSS selector, turning the borrowed parse error into `anyhow`.
fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector `{css}`: {e}"))
}

/// Collapses the text content of an element into single-spaced text.
fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Returns the `href` of the first anchor whose `title` attribute equals
/// `title`.
pub fn anchor_by_title(page: &str, title: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let anchors = selector("a[title]").ok()?;
    document
        .select(&anchors)
        .find(|a| a.value().attr("title") == Some(title))
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned)
}

/// Returns the first form on the page with all of its named inputs.
pub fn first_form(page: &str) -> Option<LoginForm> {
    let document = Html::parse_document(page);
    let forms = selector("form").ok()?;
    let inputs = selector("input").ok()?;
    let form = document.select(&forms).next()?;
    Some(read_form(form, &inputs))
}

/// Returns the first form carrying an input named `field`, used to find the
/// auto-submitting assertion form at the end of an SSO exchange.
pub fn form_with_field(page: &str, field: &str) -> Option<LoginForm> {
    let document = Html::parse_document(page);
    let forms = selector("form").ok()?;
    let inputs = selector("input").ok()?;
    document
        .select(&forms)
        .map(|form| read_form(form, &inputs))
        .find(|form| form.field(field).is_some())
}

/// Reads the action and named inputs of a form element.
fn read_form(form: ElementRef<'_>, inputs: &Selector) -> LoginForm {
    let action = form.value().attr("action").unwrap_or_default().to_string();
    let fields = form
        .select(inputs)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    LoginForm { action, fields }
}

/// Extracts the rows of the submissions table, skipping the header row and
/// any row without a student name cell.
///
/// Returns `Ok(None)` when the page has no table matching `table_css`.
pub fn submission_rows(
    page: &str,
    table_css: &str,
    name_css: &str,
    file_css: &str,
) -> Result<Option<Vec<TableRow>>> {
    let document = Html::parse_document(page);
    let table_sel = selector(table_css)?;
    let row_sel = selector("tr")?;
    let name_sel = selector(name_css)?;
    let file_sel = selector(file_css)?;
    let link_sel = selector("a[href]")?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(None);
    };

    let rows = table
        .select(&row_sel)
        .skip(1)
        .filter_map(|row| {
            let name_cell = row.select(&name_sel).next()?;
            let file_cell = row.select(&file_sel).next();
            let file_link = file_cell
                .and_then(|cell| cell.select(&link_sel).next())
                .and_then(|a| a.value().attr("href"))
                .map(str::to_owned);
            Some(TableRow {
                student: element_text(name_cell),
                file_cell: file_cell.is_some(),
                file_link,
            })
        })
        .collect();

    Ok(Some(rows))
}
