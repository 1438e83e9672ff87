//! Markup event sources.
//!
//! A source turns a document into start/characters/end callbacks on an
//! [`EventSink`]. Two backends share the same tokenizer but differ in how
//! much work one [`EventSource::pump`] call performs:
//!
//! - [`PullSource`]: a bounded number of events, returning early as soon as
//!   the sink reports a completed feature.
//! - [`BatchSource`]: a bounded amount of input bytes, completing as many
//!   features as that input contains.

mod batch;
mod lifecycle;
mod pull;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::{Backend, ReaderOptions, READ_BUFFER_CAPACITY};
use crate::error::{ReaderError, Result};

pub use batch::BatchSource;
pub use lifecycle::{active_sessions, SessionGuard};
pub use pull::PullSource;

/// Attributes of one start tag, in document order, values unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    items: Vec<(String, String)>,
}

impl Attributes {
    /// Build from `(qualified name, value)` pairs.
    #[must_use]
    pub fn new(items: Vec<(String, String)>) -> Self {
        Self { items }
    }

    /// Value of an attribute by qualified name, falling back to its local name.
    ///
    /// # Examples
    /// ```
    /// use gmlscan::source::Attributes;
    ///
    /// let attrs = Attributes::new(vec![("xlink:href".into(), "#F1".into())]);
    /// assert_eq!(attrs.get("xlink:href"), Some("#F1"));
    /// assert_eq!(attrs.get("href"), Some("#F1"));
    /// assert_eq!(attrs.get("id"), None);
    /// ```
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| self.items.iter().find(|(k, _)| local_part(k) == name))
            .map(|(_, v)| v.as_str())
    }

    /// Feature identifier: `fid`, then `gml:id`, then a bare `id`.
    #[must_use]
    pub fn fid(&self) -> Option<&str> {
        self.get("fid")
            .or_else(|| self.get("gml:id"))
            .or_else(|| self.get("id"))
    }

    /// Attributes re-serialized as they would appear inside a start tag.
    #[must_use]
    pub fn serialized(&self) -> String {
        self.items
            .iter()
            .map(|(k, v)| format!(" {k}=\"{}\"", escape(v.as_str())))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A start tag as delivered to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    /// Qualified name as written in the document (`gml:Point`).
    pub qname: String,
    pub attributes: Attributes,
}

impl StartElement {
    #[must_use]
    pub fn new(qname: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            qname: qname.into(),
            attributes,
        }
    }

    /// Name without namespace prefix.
    #[must_use]
    pub fn local_name(&self) -> &str {
        local_part(&self.qname)
    }
}

/// Strip a namespace prefix from a qualified name.
#[must_use]
pub fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map_or(qname, |(_, local)| local)
}

/// Receiver of markup events.
pub trait EventSink {
    fn start_element(&mut self, element: &StartElement) -> Result<()>;
    fn characters(&mut self, text: &str) -> Result<()>;
    fn end_element(&mut self, qname: &str) -> Result<()>;
    /// Called once when the input is exhausted.
    fn end_document(&mut self) -> Result<()>;
    /// Cooperative cancellation, checked after every delivered event.
    fn should_stop(&self) -> bool;
    /// At least one finished feature is waiting to be collected.
    fn has_completed(&self) -> bool;
}

/// Outcome of one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pump {
    /// More events can be pulled from this source.
    pub more_available: bool,
}

/// A markup event producer bound to one open document.
pub trait EventSource {
    fn backend(&self) -> Backend;

    /// Deliver zero or more events synchronously to `sink`.
    fn pump(&mut self, sink: &mut dyn EventSink) -> Result<Pump>;

    /// Input bytes consumed so far.
    fn bytes_read(&self) -> u64;
}

/// Open a document with the configured backend.
pub fn open_source(path: &Path, options: &ReaderOptions) -> Result<Box<dyn EventSource>> {
    let tokenizer = Tokenizer::open(path, options.backend)?;
    tracing::debug!(path = %path.display(), backend = options.backend.as_str(), "opened event source");
    Ok(match options.backend {
        Backend::Pull => Box::new(PullSource::new(tokenizer, options.token_budget)),
        Backend::Batch => Box::new(BatchSource::new(tokenizer, options.batch_bytes)),
    })
}

/// What one tokenizer step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Delivered,
    Skipped,
    Finished,
}

/// Shared streaming tokenizer over a file handle.
struct Tokenizer {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    finished: bool,
    _session: SessionGuard,
}

impl Tokenizer {
    fn open(path: &Path, backend: Backend) -> Result<Self> {
        let file = File::open(path).map_err(|source| ReaderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_CAPACITY, file));
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        // Nesting is validated against the path tracker instead.
        config.check_end_names = false;

        Ok(Self {
            reader,
            buf: Vec::new(),
            finished: false,
            _session: SessionGuard::acquire(backend),
        })
    }

    fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Read one token and forward it to the sink.
    fn step(&mut self, sink: &mut dyn EventSink) -> Result<Step> {
        if self.finished {
            return Ok(Step::Finished);
        }
        self.buf.clear();
        let step = match self.reader.read_event_into(&mut self.buf)? {
            Event::Start(e) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut items = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    items.push((key, attr.unescape_value()?.into_owned()));
                }
                sink.start_element(&StartElement::new(qname, Attributes::new(items)))?;
                Step::Delivered
            }
            Event::End(e) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                sink.end_element(&qname)?;
                Step::Delivered
            }
            Event::Text(e) => {
                sink.characters(&e.unescape()?)?;
                Step::Delivered
            }
            Event::CData(e) => {
                sink.characters(&String::from_utf8_lossy(&e.into_inner()))?;
                Step::Delivered
            }
            Event::Eof => {
                self.finished = true;
                sink.end_document()?;
                Step::Finished
            }
            _ => Step::Skipped,
        };
        Ok(step)
    }
}
