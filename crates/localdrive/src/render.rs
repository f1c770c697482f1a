//! Server-rendered HTML for the browse view.

use crate::listing::{DirectoryEntry, EntryKind};

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "m4v", "avi", "mp3", "m4a", "flac", "wav", "ogg", "opus",
];

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:2rem;max-width:60rem}\
table{border-collapse:collapse;width:100%}td{padding:.35rem .5rem;border-bottom:1px solid #e5e7eb}\
a{color:#2563eb;text-decoration:none}.actions button{margin-left:.25rem}\
form{display:inline-block;margin:.5rem 1rem .5rem 0}";

const SCRIPT: &str = r#"
async function post(url, fields) {
  const body = new URLSearchParams(fields);
  const res = await fetch(url, { method: 'POST', body });
  if (!res.ok) { alert((await res.json()).error); return; }
  location.reload();
}
function renameItem(path, name) {
  const next = prompt('New name', name);
  if (next && next !== name) post('/rename', { old_path: path, new_name: next });
}
function deleteItem(path) {
  if (confirm('Delete ' + path + '?')) post('/delete', { path });
}
"#;

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
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

/// Percent-encode each segment of a `/`-separated relative path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_media(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

fn js_string(value: &str) -> String {
    escape_html(&serde_json::Value::String(value.to_string()).to_string())
}

fn breadcrumbs(current_path: &str) -> String {
    let mut html = String::from("<a href=\"/\">Home</a>");
    let mut prefix = String::new();
    for segment in current_path.split('/').filter(|s| !s.is_empty()) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        html.push_str(&format!(
            " / <a href=\"/?path={}\">{}</a>",
            urlencoding::encode(&prefix),
            escape_html(segment)
        ));
    }
    html
}

fn entry_row(entry: &DirectoryEntry) -> String {
    let name = escape_html(&entry.name);
    let link = match entry.kind {
        EntryKind::Folder => format!(
            "<a href=\"/?path={}\">&#128193; {}</a>",
            urlencoding::encode(&entry.path),
            name
        ),
        EntryKind::File if is_media(&entry.name) => format!(
            "<a href=\"/stream/{}\">&#127909; {}</a>",
            encode_path(&entry.path),
            name
        ),
        EntryKind::File => format!(
            "<a href=\"/download/{}\">&#128196; {}</a>",
            encode_path(&entry.path),
            name
        ),
    };

    let path = js_string(&entry.path);
    let actions = format!(
        "<button onclick=\"renameItem({path}, {})\">Rename</button>\
<button onclick=\"deleteItem({path})\">Delete</button>",
        js_string(&entry.name)
    );

    format!("<tr><td>{link}</td><td class=\"actions\">{actions}</td></tr>")
}

/// Render the listing page for `current_path` (relative, may be empty).
pub fn render_index(entries: &[DirectoryEntry], current_path: &str) -> String {
    let current = escape_html(current_path);
    let rows: String = entries.iter().map(entry_row).collect();
    let empty = if entries.is_empty() {
        "<tr><td colspan=\"2\"><em>This folder is empty.</em></td></tr>"
    } else {
        ""
    };

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>LocalDrive - /{current}</title><style>{STYLE}</style></head>\
<body><h1>LocalDrive</h1><nav>{crumbs}</nav>\
<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
<input type=\"hidden\" name=\"path\" value=\"{current}\">\
<input type=\"file\" name=\"file\" required><button type=\"submit\">Upload</button></form>\
<form onsubmit=\"post('/create_folder', {{ path: this.path.value, name: this.name.value }}); return false;\">\
<input type=\"hidden\" name=\"path\" value=\"{current}\">\
<input type=\"text\" name=\"name\" placeholder=\"New folder\" required><button type=\"submit\">Create</button></form>\
<table><tbody>{rows}{empty}</tbody></table><script>{SCRIPT}</script></body></html>\n",
        crumbs = breadcrumbs(current_path),
    )
}
