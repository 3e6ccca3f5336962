//! Embedded web dashboard for managing stack definitions
//!
//! Plain forms that also work as htmx fragments: requests carrying
//! `HX-Request: true` get only the stacks table, everything else the full
//! page.

use crate::activator::ActivationState;
use crate::store::StackDefinition;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};

/// A stack row as shown on the dashboard
pub struct StackRow<'a> {
    pub stack: &'a StackDefinition,
    pub state: ActivationState,
}

/// Full dashboard page
pub fn render_page(rows: &[StackRow<'_>], message: Option<&str>) -> String {
    PAGE_TEMPLATE
        .replace("{{style}}", DASHBOARD_CSS)
        .replace("{{table}}", &render_table(rows, message))
}

/// The `#stacks` fragment: optional message plus the stacks table
pub fn render_table(rows: &[StackRow<'_>], message: Option<&str>) -> String {
    let mut html = String::from(r#"<div id="stacks">"#);

    if let Some(message) = message {
        html.push_str(&format!(
            r#"<p class="message">{}</p>"#,
            escape_html(message)
        ));
    }

    if rows.is_empty() {
        html.push_str(r#"<p class="empty">No hay stacks configurados.</p>"#);
    } else {
        html.push_str(
            "<table><thead><tr><th>Nombre</th><th>Ruta</th><th>Proyecto</th>\
             <th>Estado</th><th></th></tr></thead><tbody>",
        );
        for row in rows {
            html.push_str(&render_row(row));
        }
        html.push_str("</tbody></table>");
    }

    html.push_str("</div>");
    html
}

fn render_row(row: &StackRow<'_>) -> String {
    let name = escape_html(&row.stack.name);
    let target = urlencoding::encode(&row.stack.name);
    let path = escape_html(&row.stack.path);
    let project = escape_html(&row.stack.project);
    let state = state_label(row.state);

    format!(
        r##"<tr>
<td>{name}</td>
<td>{path}</td>
<td>{project}</td>
<td><span class="state state-{state}">{state}</span></td>
<td class="actions">
<form method="post" action="/wake/{target}" hx-post="/wake/{target}" hx-target="#stacks" hx-swap="outerHTML"><button type="submit">Despertar</button></form>
<form method="post" action="/edit/{target}" hx-post="/edit/{target}" hx-target="#stacks" hx-swap="outerHTML">
<input name="path" value="{path}" required>
<input name="project" value="{project}" required>
<button type="submit">Guardar</button>
</form>
<form method="post" action="/delete/{target}" hx-post="/delete/{target}" hx-target="#stacks" hx-swap="outerHTML" hx-confirm="¿Eliminar {name}?"><button type="submit" class="danger">Eliminar</button></form>
</td>
</tr>"##
    )
}

fn state_label(state: ActivationState) -> &'static str {
    match state {
        ActivationState::Unknown => "unknown",
        ActivationState::Probing => "probing",
        ActivationState::Starting => "starting",
        ActivationState::Running => "running",
        ActivationState::Failed => "failed",
    }
}

/// Escape text for HTML element content and quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap rendered HTML in a response
pub fn html_response(status: StatusCode, html: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(html)))
        .expect("valid response with StatusCode enum and static header")
}

const PAGE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Farolero</title>
    <script src="https://unpkg.com/htmx.org@1.9.12"></script>
    <style>{{style}}</style>
</head>
<body>
    <nav class="navbar"><h1>Farolero</h1></nav>
    <main class="container">
        <section>
            <h2>Añadir stack</h2>
            <form class="add" method="post" action="/add" hx-post="/add" hx-target="#stacks" hx-swap="outerHTML">
                <input name="name" placeholder="nombre" required>
                <input name="path" placeholder="/ruta/al/stack" required>
                <input name="project" placeholder="proyecto compose" required>
                <button type="submit">Añadir</button>
            </form>
        </section>
        <section>
            <h2>Stacks</h2>
            {{table}}
        </section>
    </main>
</body>
</html>
"##;

const DASHBOARD_CSS: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; background: #f5f6f8; color: #1d2330; }
.navbar { background: #1d2330; color: #f5c542; padding: 0.75rem 1.5rem; }
.navbar h1 { margin: 0; font-size: 1.4rem; }
.container { max-width: 1100px; margin: 1.5rem auto; padding: 0 1rem; }
table { width: 100%; border-collapse: collapse; background: #fff; }
th, td { padding: 0.5rem; border-bottom: 1px solid #e2e5ea; text-align: left; vertical-align: top; }
.actions form { display: inline-block; margin: 0 0.25rem 0.25rem 0; }
input { padding: 0.3rem; border: 1px solid #c8ccd4; border-radius: 3px; }
button { padding: 0.3rem 0.7rem; border: 0; border-radius: 3px; background: #2f6fde; color: #fff; cursor: pointer; }
button.danger { background: #c93838; }
.message { padding: 0.5rem 0.75rem; background: #fff7d6; border-left: 4px solid #f5c542; }
.empty { color: #6b7280; }
.state { font-size: 0.85rem; padding: 0.1rem 0.4rem; border-radius: 3px; background: #e2e5ea; }
.state-running { background: #d1f5dc; }
.state-starting { background: #fff1c2; }
.state-failed { background: #fbd5d5; }
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_table_lists_stacks() {
        let demo = StackDefinition::new("demo", "/srv/demo", "demo");
        let rows = [StackRow {
            stack: &demo,
            state: ActivationState::Running,
        }];

        let html = render_table(&rows, Some("Stack 'demo' añadido."));

        assert!(html.starts_with(r#"<div id="stacks">"#));
        assert!(html.contains("Stack &#39;demo&#39; añadido."));
        assert!(html.contains("<td>/srv/demo</td>"));
        assert!(html.contains(r#"hx-post="/wake/demo""#));
        assert!(html.contains("state-running"));
    }

    #[test]
    fn test_empty_table() {
        let html = render_table(&[], None);
        assert!(html.contains("No hay stacks configurados."));
        assert!(!html.contains("<table>"));
    }

    #[test]
    fn test_stack_names_are_escaped_and_encoded() {
        let odd = StackDefinition::new("a b<c>", "/srv/x", "x");
        let rows = [StackRow {
            stack: &odd,
            state: ActivationState::Unknown,
        }];

        let html = render_table(&rows, None);
        assert!(html.contains("<td>a b&lt;c&gt;</td>"));
        assert!(html.contains("/delete/a%20b%3Cc%3E"));
    }

    #[test]
    fn test_page_embeds_table() {
        let page = render_page(&[], Some("hola"));
        assert!(page.contains("<title>Farolero</title>"));
        assert!(page.contains(r#"<p class="message">hola</p>"#));
        assert!(!page.contains("{{table}}"));
    }
}
