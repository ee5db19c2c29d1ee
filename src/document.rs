use std::{
    borrow::Cow,
    fmt::{self, Display, Formatter},
    fs,
    path::Path,
};

use anyhow::{anyhow, bail, Context, Result};
use encoding_rs::{Encoding, UTF_8};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Index path from an element to one of its descendants: each entry is a position in the
/// `children` list of the element one level up. The empty path is the element itself.
pub type NodePath = Vec<usize>;

/// A node in a parsed document.
///
/// Everything except [`Node::Element`] keeps the raw, still-escaped text found between its
/// delimiters, so writing a document back reproduces the input byte for byte. A
/// [`Node::DocType`] holds the whole declaration, `<!DOCTYPE` and `>` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    Declaration(String),
    DocType(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// True for text nodes that contain nothing but whitespace.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(text) if text.trim().is_empty())
    }

    /// Nodes that take part in indentation: elements, comments and processing instructions.
    /// Text and CDATA only ever sit between them.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Node::Element(_) | Node::Comment(_) | Node::ProcessingInstruction(_)
        )
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Node::Element(element) => Display::fmt(element, f),
            Node::Text(text) => f.write_str(text),
            Node::CData(data) => write!(f, "<![CDATA[{data}]]>"),
            Node::Comment(comment) => write!(f, "<!--{comment}-->"),
            Node::ProcessingInstruction(content) | Node::Declaration(content) => {
                write!(f, "<?{content}?>")
            }
            Node::DocType(declaration) => f.write_str(declaration),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    /// Everything between `<` and `>` (or `/>`), exactly as written in the source.
    start_tag: String,
    /// Unescaped attribute values in source order.
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    self_closing: bool,
}

impl Element {
    fn from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<Self> {
        let name = utf8(start.name().as_ref())?;
        let start_tag = utf8(start)?;
        let attributes = start
            .attributes()
            .map(|attribute| {
                let attribute = attribute?;
                let key = utf8(attribute.key.as_ref())?;
                // entities declared in a DTD are unknown to the reader, look those up raw
                let value = match attribute.unescape_value() {
                    Ok(value) => value.into_owned(),
                    Err(error) => {
                        log::debug!("keeping {key} on <{name}> escaped: {error}");
                        utf8(&attribute.value)?
                    }
                };
                Ok((key, value))
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid attributes on <{name}>"))?;

        Ok(Self {
            name,
            start_tag,
            attributes,
            children: Vec::new(),
            self_closing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unescaped value of the attribute `key`, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Direct child elements, skipping text, comments and the like.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// First direct child element called `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.name == name)
    }

    /// This element followed by all of its descendant elements in document order, each with
    /// its path relative to `self`.
    pub fn descendants(&self) -> Vec<(NodePath, &Element)> {
        let mut descendants = Vec::new();
        self.collect_descendants(&mut Vec::new(), &mut descendants);
        descendants
    }

    fn collect_descendants<'a>(
        &'a self,
        path: &mut NodePath,
        descendants: &mut Vec<(NodePath, &'a Element)>,
    ) {
        descendants.push((path.clone(), self));
        for (index, child) in self.children.iter().enumerate() {
            if let Node::Element(child) = child {
                path.push(index);
                child.collect_descendants(path, descendants);
                path.pop();
            }
        }
    }

    fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut element = self;
        for &index in path {
            element = match element.children.get_mut(index)? {
                Node::Element(child) => child,
                _ => return None,
            };
        }
        Some(element)
    }

    /// Detaches the element at `path` from its parent, together with the whitespace-only text
    /// that directly precedes it. Returns `None` if `path` is empty or does not lead to an
    /// element.
    pub fn remove_at(&mut self, path: &[usize]) -> Option<Element> {
        let (&index, parent_path) = path.split_last()?;
        let parent = self.element_at_mut(parent_path)?;
        if !matches!(parent.children.get(index), Some(Node::Element(_))) {
            return None;
        }

        let Node::Element(element) = parent.children.remove(index) else {
            return None;
        };

        if index > 0 && parent.children[index - 1].is_whitespace() {
            parent.children.remove(index - 1);
        }

        Some(element)
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.self_closing && self.children.is_empty() {
            return write!(f, "<{}/>", self.start_tag);
        }

        write!(f, "<{}>", self.start_tag)?;
        for child in &self.children {
            Display::fmt(child, f)?;
        }
        write!(f, "</{}>", self.name)
    }
}

/// A parsed XML file: the root element plus whatever sits before and after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Encoding the file was stored in, used again when saving.
    encoding: &'static Encoding,
    byte_order_mark: bool,
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("unable to read {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("unable to parse {}", path.display()))
    }

    /// Decodes `bytes` with the encoding named by a byte order mark or the XML declaration,
    /// UTF-8 if neither says otherwise, and parses the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let encoding = match Encoding::for_bom(bytes) {
            Some((encoding, _)) => encoding,
            None => declared_encoding(bytes)?.unwrap_or(UTF_8),
        };
        if !encoding.is_ascii_compatible() {
            bail!("{} documents are not supported", encoding.name());
        }

        let source = if encoding == UTF_8 {
            Cow::Borrowed(std::str::from_utf8(bytes).context("document is not valid UTF-8")?)
        } else {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or_else(|| anyhow!("document is not valid {}", encoding.name()))?
        };

        Ok(Self {
            encoding,
            ..Self::parse(&source)?
        })
    }

    /// Parses text that is already decoded. The document is saved as UTF-8.
    pub fn parse(source: &str) -> Result<Self> {
        let (byte_order_mark, source) = match source.strip_prefix(BYTE_ORDER_MARK) {
            Some(rest) => (true, rest),
            None => (false, source),
        };

        let mut reader = Reader::from_str(source);
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root = None;
        let mut open_elements: Vec<Element> = Vec::new();

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| anyhow!("malformed XML near byte {}: {e}", reader.buffer_position()))?;

            let node = match event {
                Event::Start(start) => {
                    open_elements.push(Element::from_start(&start, false)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(Element::from_start(&start, true)?),
                Event::End(end) => {
                    let element = open_elements.pop().ok_or_else(|| {
                        anyhow!(
                            "unexpected closing tag </{}> at byte {position}",
                            String::from_utf8_lossy(end.name().as_ref())
                        )
                    })?;
                    Node::Element(element)
                }
                Event::Text(text) => Node::Text(utf8(&text)?),
                Event::CData(data) => Node::CData(utf8(&data)?),
                Event::Comment(comment) => Node::Comment(utf8(&comment)?),
                Event::PI(content) => Node::ProcessingInstruction(utf8(&content)?),
                Event::Decl(declaration) => Node::Declaration(utf8(&declaration)?),
                Event::DocType(_) => {
                    Node::DocType(source[position..reader.buffer_position()].to_owned())
                }
                Event::Eof => break,
            };

            if let Some(parent) = open_elements.last_mut() {
                parent.children.push(node);
                continue;
            }

            match node {
                Node::Element(element) => {
                    if root.is_some() {
                        bail!(
                            "second root element <{}> at byte {position}",
                            element.name
                        );
                    }
                    root = Some(element);
                }
                Node::Text(text) if !text.trim().is_empty() => {
                    bail!("text outside the root element at byte {position}")
                }
                node if root.is_none() => prolog.push(node),
                node => epilog.push(node),
            }
        }

        if let Some(element) = open_elements.last() {
            bail!("<{}> is never closed", element.name);
        }

        let root = root.ok_or_else(|| anyhow!("document has no root element"))?;

        Ok(Self {
            encoding: UTF_8,
            byte_order_mark,
            prolog,
            root,
            epilog,
        })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// The serialized document in its original encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let text = self.to_string();
        if self.encoding == UTF_8 {
            return Ok(text.into_bytes());
        }

        let (bytes, _, unmappable) = self.encoding.encode(&text);
        if unmappable {
            bail!("document cannot be represented in {}", self.encoding.name());
        }
        Ok(bytes.into_owned())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?)
            .with_context(|| format!("unable to write {}", path.display()))
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.byte_order_mark {
            write!(f, "{BYTE_ORDER_MARK}")?;
        }
        for node in &self.prolog {
            Display::fmt(node, f)?;
        }
        Display::fmt(&self.root, f)?;
        for node in &self.epilog {
            Display::fmt(node, f)?;
        }
        Ok(())
    }
}

/// The encoding named in the XML declaration, if the document starts with one.
fn declared_encoding(bytes: &[u8]) -> Result<Option<&'static Encoding>> {
    let Ok(Event::Decl(declaration)) = Reader::from_reader(bytes).read_event() else {
        return Ok(None);
    };
    let Some(label) = declaration.encoding() else {
        return Ok(None);
    };

    let label = label?;
    Encoding::for_label(&label).map(Some).ok_or_else(|| {
        anyhow!(
            "unknown encoding {:?} in the XML declaration",
            String::from_utf8_lossy(&label)
        )
    })
}

fn utf8(bytes: &[u8]) -> Result<String> {
    Ok(std::str::from_utf8(bytes)?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated by hand -->
<Uintah_specification>
  <Meta>
    <title>Lid &amp; driven <![CDATA[cavity <3>]]></title>
  </Meta>
  <Grid>
    <BoundaryConditions>
      <Face side='x-' name="lid &quot;top&quot;" type="Velocity" >
        <BCType label="u"   var="Dirichlet" value="1.0" />
        <?uintah keep?>
      </Face>
      <Face circle="x-" origin="0 0 0" radius="1"></Face>
    </BoundaryConditions>
  </Grid>
</Uintah_specification>
"#;

    #[test]
    fn unmodified_document_round_trips_verbatim() {
        let document = Document::parse(SAMPLE).unwrap();
        assert_eq!(document.to_string(), SAMPLE);
    }

    #[test]
    fn byte_order_mark_is_preserved() {
        let source = format!("{BYTE_ORDER_MARK}<a>\n  <b/>\n</a>\n");
        let document = Document::parse(&source).unwrap();
        assert_eq!(document.root().name(), "a");
        assert_eq!(document.to_string(), source);
    }

    #[test]
    fn attributes_are_unescaped_on_lookup() {
        let document = Document::parse(SAMPLE).unwrap();
        let face = document
            .root()
            .child("Grid")
            .and_then(|grid| grid.child("BoundaryConditions"))
            .and_then(|bcs| bcs.child("Face"))
            .unwrap();

        assert_eq!(face.attribute("side"), Some("x-"));
        assert_eq!(face.attribute("name"), Some("lid \"top\""));
        assert_eq!(face.attribute("missing"), None);
    }

    #[test]
    fn descendants_are_in_document_order_with_paths() {
        let document = Document::parse("<a><b><c/></b>text<d/></a>").unwrap();
        let names = document
            .root()
            .descendants()
            .into_iter()
            .map(|(path, element)| (path, element.name().to_string()))
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![
                (vec![], "a".to_string()),
                (vec![0], "b".to_string()),
                (vec![0, 0], "c".to_string()),
                (vec![2], "d".to_string()),
            ]
        );
    }

    #[test]
    fn doctype_is_written_back_as_found() {
        for source in [
            "<!doctype  U>\n<U/>",
            "<!DOCTYPE U SYSTEM \"u.dtd\">\n<U/>",
            "<!DOCTYPE U [\n  <!ENTITY e \"x\">\n]>\n<U a=\"&e;\"/>",
        ] {
            let document = Document::parse(source).unwrap();
            assert_eq!(document.to_string(), source);
        }
    }

    #[test]
    fn dtd_entities_in_attributes_stay_escaped() {
        let source = "<!DOCTYPE U [<!ENTITY e \"x\">]><U a=\"&e;\" b=\"&lt;\"/>";
        let document = Document::parse(source).unwrap();
        assert_eq!(document.root().attribute("a"), Some("&e;"));
        assert_eq!(document.root().attribute("b"), Some("<"));
        assert_eq!(document.to_string(), source);
    }

    #[test]
    fn latin1_documents_are_decoded_and_encoded_again() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<a>\n  <!-- caf\xe9 -->\n  <b/>\n</a>\n";

        let document = Document::from_bytes(bytes).unwrap();
        assert_eq!(document.encoding().name(), "windows-1252");
        assert!(document.to_string().contains("caf\u{e9}"));
        assert_eq!(document.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn undeclared_documents_must_be_utf8() {
        let document = Document::from_bytes("<a>\u{e9}</a>".as_bytes()).unwrap();
        assert_eq!(document.encoding(), UTF_8);
        assert_eq!(document.to_bytes().unwrap(), "<a>\u{e9}</a>".as_bytes());

        assert!(Document::from_bytes(b"<a>caf\xe9</a>").is_err());
    }

    #[test]
    fn unsupported_encodings_are_rejected() {
        assert!(Document::from_bytes(b"<?xml version=\"1.0\" encoding=\"klingon\"?><a/>").is_err());
        assert!(Document::from_bytes(b"\xff\xfe<\0a\0/\0>\0").is_err());
    }

    #[test]
    fn remove_at_takes_leading_whitespace_along() {
        let source = "<a>\n  <b/>\n  <c/>\n</a>";

        let mut document = Document::parse(source).unwrap();
        let removed = document.root_mut().remove_at(&[1]).unwrap();
        assert_eq!(removed.name(), "b");
        assert_eq!(document.to_string(), "<a>\n  <c/>\n</a>");

        let mut document = Document::parse(source).unwrap();
        document.root_mut().remove_at(&[3]).unwrap();
        assert_eq!(document.to_string(), "<a>\n  <b/>\n</a>");
    }

    #[test]
    fn remove_at_keeps_meaningful_text() {
        let mut document = Document::parse("<a>keep<b/><c/></a>").unwrap();
        document.root_mut().remove_at(&[1]).unwrap();
        assert_eq!(document.to_string(), "<a>keep<c/></a>");
    }

    #[test]
    fn remove_at_rejects_non_elements_and_root() {
        let mut document = Document::parse("<a>text<b/></a>").unwrap();
        assert!(document.root_mut().remove_at(&[]).is_none());
        assert!(document.root_mut().remove_at(&[0]).is_none());
        assert!(document.root_mut().remove_at(&[5]).is_none());
        assert_eq!(document.to_string(), "<a>text<b/></a>");
    }

    #[test]
    fn emptied_self_closing_and_open_elements_keep_their_form() {
        let document = Document::parse("<a><b></b><c /></a>").unwrap();
        assert_eq!(document.to_string(), "<a><b></b><c /></a>");
    }

    #[test]
    fn malformed_documents_are_rejected() {
        for source in [
            "<a><b></a>",
            "<a><b>",
            "<a/><b/>",
            "",
            "<!-- only a comment -->",
            "stray <a/>",
            r#"<a x="1" x="2"/>"#,
        ] {
            assert!(
                Document::parse(source).is_err(),
                "expected {source:?} to be rejected"
            );
        }
    }

    #[test]
    fn load_reports_the_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ups");
        fs::write(&path, "<a>").unwrap();

        let error = Document::load(&path).unwrap_err();
        assert!(format!("{error:#}").contains("broken.ups"));
    }

    #[test]
    fn save_writes_the_original_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.ups");
        let bytes = b"<?xml version='1.0' encoding='latin1'?><a>\xe9<b/></a>";
        fs::write(&path, bytes).unwrap();

        let mut document = Document::load(&path).unwrap();
        document.root_mut().remove_at(&[1]).unwrap();
        document.save(&path).unwrap();

        assert_eq!(
            fs::read(&path).unwrap(),
            b"<?xml version='1.0' encoding='latin1'?><a>\xe9</a>"
        );
    }
}
