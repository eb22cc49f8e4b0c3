use detection_store::{ArtifactMetadata, ArtifactPage};
use std::fmt::Write;

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         .frames {{ display: flex; flex-wrap: wrap; gap: 1em; }}\n\
         .frame {{ width: 220px; }}\n\
         .frame img {{ width: 100%; }}\n\
         </style>\n</head>\n<body>\n<h1>{}</h1>\n{}</body>\n</html>\n",
        escape(title),
        escape(title),
        body
    )
}

fn image_url(name: &str) -> String {
    format!("/frames/{}/image", urlencoding::encode(name))
}

fn detail_url(name: &str) -> String {
    format!("/frames/{}", urlencoding::encode(name))
}

fn describe(metadata: Option<&ArtifactMetadata>) -> (String, String) {
    match metadata {
        Some(metadata) => (
            escape(&metadata.timestamp),
            escape(&metadata.objects.join(", ")),
        ),
        None => ("unknown".to_string(), "unknown".to_string()),
    }
}

/// One page of the frame listing. `marker` is the continuation this page was requested with.
pub fn render_list(page: &ArtifactPage, marker: Option<&str>) -> String {
    let mut body = String::new();

    if page.items.is_empty() {
        body.push_str("<p>No annotated frames yet.</p>\n");
    } else {
        body.push_str("<div class=\"frames\">\n");
        for item in &page.items {
            let (timestamp, objects) = describe(item.metadata.as_ref());
            let _ = write!(
                body,
                "<div class=\"frame\">\n<a href=\"{}\"><img src=\"{}\" alt=\"{}\" loading=\"lazy\"></a>\n\
                 <p><a href=\"{}\">{}</a><br>Time: {}<br>Objects: {}</p>\n</div>\n",
                escape(&detail_url(&item.name)),
                escape(&image_url(&item.name)),
                escape(&item.name),
                escape(&detail_url(&item.name)),
                escape(&item.name),
                timestamp,
                objects,
            );
        }
        body.push_str("</div>\n");
    }

    body.push_str("<p>");
    if marker.is_some() {
        body.push_str("<a href=\"/\">First page</a> ");
    }
    if let Some(next) = &page.next_marker {
        let _ = write!(
            body,
            "<a href=\"{}\">Next page</a>",
            escape(&format!("/?marker={}", urlencoding::encode(next)))
        );
    }
    body.push_str("</p>\n");

    layout("Annotated frames", &body)
}

pub fn render_detail(name: &str, metadata: Option<&ArtifactMetadata>) -> String {
    let (timestamp, objects) = describe(metadata);
    let body = format!(
        "<p><a href=\"/\">Back to frames</a></p>\n<img src=\"{}\" alt=\"{}\">\n\
         <dl>\n<dt>Time</dt><dd>{}</dd>\n<dt>Objects</dt><dd>{}</dd>\n</dl>\n",
        escape(&image_url(name)),
        escape(name),
        timestamp,
        objects,
    );
    layout(name, &body)
}
