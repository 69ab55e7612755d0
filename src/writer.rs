//! Streaming sitemap XML writer
//!
//! Output goes to a temporary sibling of the target path and is renamed into place by
//! `end_document`, so readers never observe a half-written file.

use crate::config::GenerateConfig;
use crate::error::{Error, Result};
use flate2::{Compression, GzBuilder};
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Root element of a generated document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootElement {
    UrlSet,
    SitemapIndex,
}

impl RootElement {
    pub fn name(&self) -> &'static str {
        match self {
            RootElement::UrlSet => "urlset",
            RootElement::SitemapIndex => "sitemapindex",
        }
    }

    fn schema_location(&self) -> &'static str {
        match self {
            RootElement::UrlSet => {
                "http://www.sitemaps.org/schemas/sitemap/0.9 http://www.sitemaps.org/schemas/sitemap/0.9/sitemap.xsd"
            }
            RootElement::SitemapIndex => {
                "http://www.sitemaps.org/schemas/sitemap/0.9 http://www.sitemaps.org/schemas/sitemap/0.9/siteindex.xsd"
            }
        }
    }
}

/// Body of one written element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    Text(String),
    /// Ordered `(name, text)` child elements
    Children(Vec<(String, String)>),
}

/// Writer settings taken from `[generate]`
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub flush_every: usize,
    pub gzip: bool,
    pub xsl_url: Option<String>,
}

impl WriterOptions {
    pub fn from_config(config: &GenerateConfig) -> Self {
        Self {
            flush_every: config.flush_every.max(1),
            gzip: config.gzip,
            xsl_url: config.xsl_url.clone(),
        }
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::from_config(&GenerateConfig::default())
    }
}

/// Writes one `<urlset>` or `<sitemapindex>` document
pub struct SitemapWriter {
    writer: Writer<BufWriter<File>>,
    root: RootElement,
    target: PathBuf,
    tmp_path: PathBuf,
    options: WriterOptions,
    elements: usize,
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Invalid output path: {}", path.display())))?;
    let mut name = name.to_os_string();
    name.push(suffix);
    Ok(path.with_file_name(name))
}

impl SitemapWriter {
    /// Open the temporary sink for `target`
    pub fn create(target: &Path, root: RootElement, options: WriterOptions) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = sibling_with_suffix(target, ".tmp")?;
        let file = File::create(&tmp_path)?;

        Ok(Self {
            writer: Writer::new_with_indent(BufWriter::new(file), b' ', 2),
            root,
            target: target.to_path_buf(),
            tmp_path,
            options,
            elements: 0,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Elements written so far, excluding the root
    pub fn element_count(&self) -> usize {
        self.elements
    }

    /// XML declaration, optional stylesheet and the opening root element
    pub fn start_document(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        if let Some(xsl) = &self.options.xsl_url {
            let pi = format!(
                "xml-stylesheet type=\"text/xsl\" href=\"{}\"",
                quick_xml::escape::escape(xsl.as_str())
            );
            self.writer.write_event(Event::PI(BytesPI::new(pi)))?;
        }

        let root = BytesStart::new(self.root.name()).with_attributes([
            ("xmlns", SITEMAP_NS),
            ("xmlns:xsi", XSI_NS),
            ("xsi:schemaLocation", self.root.schema_location()),
        ]);
        self.writer.write_event(Event::Start(root))?;
        Ok(())
    }

    /// Write one element, flushing the buffer every `flush_every` elements
    pub fn write_element(&mut self, name: &str, content: &ElementContent) -> Result<()> {
        self.writer.write_event(Event::Start(BytesStart::new(name)))?;
        match content {
            ElementContent::Text(text) => {
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
            }
            ElementContent::Children(children) => {
                for (child, text) in children {
                    self.writer
                        .write_event(Event::Start(BytesStart::new(child.as_str())))?;
                    self.writer.write_event(Event::Text(BytesText::new(text)))?;
                    self.writer
                        .write_event(Event::End(BytesEnd::new(child.as_str())))?;
                }
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;

        self.elements += 1;
        if self.elements % self.options.flush_every == 0 {
            self.writer.get_mut().flush()?;
        }
        Ok(())
    }

    /// Close the root, move the file into place and return its size in bytes
    pub fn end_document(mut self) -> Result<u64> {
        self.writer
            .write_event(Event::End(BytesEnd::new(self.root.name())))?;
        self.writer.get_mut().write_all(b"\n")?;

        let file = self
            .writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.target)?;
        if self.options.gzip {
            write_gzip_copy(&self.target)?;
        }

        let size = fs::metadata(&self.target)?.len();
        debug!(
            path = %self.target.display(),
            elements = self.elements,
            bytes = size,
            "Finished sitemap document"
        );
        Ok(size)
    }

    /// Drop the partial output
    pub fn abandon(self) -> Result<()> {
        let tmp_path = self.tmp_path.clone();
        drop(self);
        match fs::remove_file(&tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Write `{path}.gz` next to `path`
fn write_gzip_copy(path: &Path) -> Result<()> {
    let gz_path = sibling_with_suffix(path, ".gz")?;
    let gz_tmp = sibling_with_suffix(&gz_path, ".tmp")?;

    let mut source = File::open(path)?;
    let out = File::create(&gz_tmp)?;
    let mut encoder = GzBuilder::new().write(BufWriter::new(out), Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.flush()?;

    fs::rename(&gz_tmp, &gz_path)?;
    Ok(())
}
