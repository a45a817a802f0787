pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use minidom::Element;

    /// Placeholder replaced by [`stanza_with_id`].
    pub const ID_PLACEHOLDER: &str = "{{id}}";

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    /// Raw XML of a stanza fixture.
    pub fn stanza_xml(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    /// A stanza fixture parsed into an element.
    pub fn stanza(name: &str) -> Element {
        parse_or_panic(name, &stanza_xml(name))
    }

    /// A stanza fixture with its `{{id}}` placeholder set to `id`, for
    /// answering a tracked IQ.
    pub fn stanza_with_id(name: &str, id: &str) -> Element {
        let xml = stanza_xml(name).replace(ID_PLACEHOLDER, id);
        parse_or_panic(name, &xml)
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn parse_or_panic(name: &str, xml: &str) -> Element {
        xml.trim()
            .parse()
            .unwrap_or_else(|error| panic!("fixture {name} is not valid XML: {error}"))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}
