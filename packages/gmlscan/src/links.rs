//! Link resolution pass.
//!
//! Rewrites a document so that every element carrying an `xlink:href`
//! reference to an identified element (`#id` within the document,
//! `other.gml#id` in a sibling document) contains a copy of the referenced
//! element instead. Everything outside the rewritten elements is copied
//! byte for byte.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use roxmltree::{Document, Node, NodeId};

use crate::config::{MAX_LINK_DEPTH, RESOLVED_SUFFIX};
use crate::error::{ReaderError, Result};
use crate::schema::write_atomic;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static HREF_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+(?:[\w.-]+:)?href\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("valid regex")
});

/// Skip-list entry that disables resolution entirely.
pub const SKIP_ALL: &str = "ALL";

/// A reference that could not be followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Local name of the element carrying the reference.
    pub element: String,
    pub href: String,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone)]
pub struct LinkResolution {
    /// Where the resolved document was written.
    pub output_path: PathBuf,
    /// The output went to the system temp directory.
    pub is_temp: bool,
    /// Number of references replaced by content.
    pub resolved: usize,
    pub dangling: Vec<DanglingReference>,
}

/// A parsed `href` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link<'a> {
    file: Option<&'a str>,
    id: &'a str,
}

impl<'a> Link<'a> {
    /// `#id` or `file#id`; remote and fragment-less references are not links.
    fn parse(href: &'a str) -> Option<Self> {
        let (file, id) = href.trim().split_once('#')?;
        if id.is_empty() || file.contains("://") {
            return None;
        }
        Some(Self {
            file: (!file.is_empty()).then_some(file),
            id,
        })
    }
}

/// One parsed document with its identifier index.
struct View<'a, 'input> {
    text: &'input str,
    doc: &'a Document<'input>,
    ids: HashMap<String, NodeId>,
}

impl<'a, 'input> View<'a, 'input> {
    fn new(text: &'input str, doc: &'a Document<'input>) -> Self {
        let ids = doc
            .descendants()
            .filter(Node::is_element)
            .filter_map(|node| {
                node.attributes()
                    .find(|a| a.name() == "id" || a.name() == "fid")
                    .map(|a| (a.value().to_string(), node.id()))
            })
            .collect();
        Self { text, doc, ids }
    }

    fn node(&self, id: &str) -> Option<Node<'a, 'input>> {
        self.ids.get(id).and_then(|&node| self.doc.get_node(node))
    }
}

struct Resolver<'s> {
    base_dir: PathBuf,
    skip: &'s [String],
    strict: bool,
    external: HashMap<PathBuf, Option<Rc<str>>>,
    resolved: usize,
    dangling: Vec<DanglingReference>,
}

impl Resolver<'_> {
    fn link_of<'n>(&self, node: Node<'n, '_>) -> Option<(&'n str, Link<'n>)> {
        let element = node.tag_name().name();
        if self.skip.iter().any(|s| s == SKIP_ALL || s == element) {
            return None;
        }
        let href = node.attributes().find(|a| a.name() == "href")?.value();
        Link::parse(href).map(|link| (href, link))
    }

    fn render(&mut self, view: &View<'_, '_>, node: Node<'_, '_>, depth: usize, out: &mut String) -> Result<()> {
        let range = node.range();
        let Some((href, link)) = self.link_of(node) else {
            return self.render_children(view, node, range.start, depth, out);
        };

        if depth >= MAX_LINK_DEPTH {
            tracing::warn!(href, depth, "link nesting limit reached, reference kept");
            return self.render_children(view, node, range.start, depth, out);
        }

        let slice = &view.text[range.clone()];
        let tag_end = start_tag_end(slice).ok_or_else(|| {
            ReaderError::structural(depth, format!("unterminated start tag at byte {}", range.start))
        })?;
        let start_tag = &slice[..tag_end];

        let mut inlined = String::new();
        let found = match link.file {
            None => match view.node(link.id) {
                Some(target) => {
                    self.render(view, target, depth + 1, &mut inlined)?;
                    true
                }
                None => false,
            },
            Some(file) => self.render_external(file, link.id, depth + 1, &mut inlined)?,
        };

        if !found {
            let reference = DanglingReference {
                element: node.tag_name().name().to_string(),
                href: href.to_string(),
            };
            tracing::warn!(element = %reference.element, href, "dangling link");
            if self.strict {
                return Err(ReaderError::DanglingLink {
                    element: reference.element,
                    href: reference.href,
                });
            }
            self.dangling.push(reference);
            return self.render_children(view, node, range.start, depth, out);
        }

        self.resolved += 1;
        let opened = HREF_ATTRIBUTE.replace(start_tag, "");
        match opened.strip_suffix("/>") {
            Some(open) => {
                out.push_str(open.trim_end());
                out.push('>');
                out.push_str(&inlined);
                out.push_str("</");
                out.push_str(tag_qname(start_tag));
                out.push('>');
                Ok(())
            }
            None => {
                out.push_str(&opened);
                out.push_str(&inlined);
                self.render_children(view, node, range.start + tag_end, depth, out)
            }
        }
    }

    /// Copy `node` from byte `from` to its end, rendering element children.
    fn render_children(
        &mut self,
        view: &View<'_, '_>,
        node: Node<'_, '_>,
        from: usize,
        depth: usize,
        out: &mut String,
    ) -> Result<()> {
        let mut cursor = from;
        for child in node.children().filter(Node::is_element) {
            let child_range = child.range();
            out.push_str(&view.text[cursor..child_range.start]);
            self.render(view, child, depth, out)?;
            cursor = child_range.end;
        }
        out.push_str(&view.text[cursor..node.range().end]);
        Ok(())
    }

    fn render_external(&mut self, file: &str, id: &str, depth: usize, out: &mut String) -> Result<bool> {
        let path = self.base_dir.join(file);
        let text = match self.external.get(&path) {
            Some(cached) => cached.clone(),
            None => {
                let loaded = match fs::read_to_string(&path) {
                    Ok(text) => Some(Rc::<str>::from(text)),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "cannot read linked document");
                        None
                    }
                };
                self.external.insert(path.clone(), loaded.clone());
                loaded
            }
        };
        let Some(text) = text else {
            return Ok(false);
        };

        let doc = match Document::parse(&text) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot parse linked document");
                return Ok(false);
            }
        };
        let view = View::new(&text, &doc);
        let Some(target) = view.node(id) else {
            return Ok(false);
        };
        let base_dir = std::mem::replace(
            &mut self.base_dir,
            path.parent().map(Path::to_path_buf).unwrap_or_default(),
        );
        let result = self.render(&view, target, depth, out);
        self.base_dir = base_dir;
        result.map(|()| true)
    }
}

/// Byte offset just past the `>` closing the leading start tag.
fn start_tag_end(markup: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in markup.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if q == c => quote = None,
            (None, '>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

fn tag_qname(start_tag: &str) -> &str {
    start_tag
        .trim_start_matches('<')
        .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .next()
        .unwrap_or_default()
}

/// `roads.gml` -> `roads.resolved.gml`.
#[must_use]
pub fn resolved_file_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}{RESOLVED_SUFFIX}")
}

/// Resolve every link in `source` and write the resolved document.
///
/// Elements whose local name is in `skip` keep their references
/// ([`SKIP_ALL`] disables resolution). Unresolvable references are reported
/// in [`LinkResolution::dangling`], or fail the pass when `strict` is set.
pub fn resolve_links(source: &Path, skip: &[String], strict: bool) -> Result<LinkResolution> {
    let text = fs::read_to_string(source).map_err(|err| ReaderError::Open {
        path: source.to_path_buf(),
        source: err,
    })?;
    let doc = Document::parse(&text)?;
    let view = View::new(&text, &doc);

    let mut resolver = Resolver {
        base_dir: source.parent().map(Path::to_path_buf).unwrap_or_default(),
        skip,
        strict,
        external: HashMap::new(),
        resolved: 0,
        dangling: Vec::new(),
    };

    let root = doc.root_element();
    let root_range = root.range();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..root_range.start]);
    resolver.render(&view, root, 0, &mut out)?;
    out.push_str(&text[root_range.end..]);

    let file_name = resolved_file_name(source);
    let beside = source.with_file_name(&file_name);
    let (output_path, is_temp) = match write_atomic(&beside, &out) {
        Ok(()) => (beside, false),
        Err(err) => {
            let temp = std::env::temp_dir().join(&file_name);
            tracing::warn!(path = %beside.display(), error = %err, "writing resolved document to temp dir");
            write_atomic(&temp, &out)?;
            (temp, true)
        }
    };

    tracing::info!(
        path = %output_path.display(),
        resolved = resolver.resolved,
        dangling = resolver.dangling.len(),
        "links resolved"
    );
    Ok(LinkResolution {
        output_path,
        is_temp,
        resolved: resolver.resolved,
        dangling: resolver.dangling,
    })
}
