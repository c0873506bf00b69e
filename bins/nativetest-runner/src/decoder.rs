/// Result Decoder - Structured Failure Details from Container Output
///
/// Containers may print a machine-readable failure report to stdout. The
/// report starts at the first XML declaration and runs to the end of the
/// captured text:
///
/// ```xml
/// <?xml version="1.0"?>
/// <TestRun>
///   <FailedTest>
///     <Name>vector_push</Name>
///     <FailureType>Assertion</FailureType>
///     <Location><File>vec_test.cpp</File><Line>42</Line></Location>
///     <Message>expected 3, got 2</Message>
///   </FailedTest>
/// </TestRun>
/// ```
///
/// Decoding never fails a run: a missing or malformed payload simply means
/// no detail is available.

use nativetest_common::types::{FailureDetail, FailureLocation};
use roxmltree::{Document, Node};
use tracing::debug;

pub const XML_MARKER: &str = "<?xml";

/// Pluggable payload decoder (one per container flavour)
pub trait ResultDecoder: Send + Sync {
    fn decode(&self, stdout: &str) -> Vec<FailureDetail>;
}

/// Decodes `<FailedTest>` records from an embedded XML document
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFailureDecoder;

impl ResultDecoder for XmlFailureDecoder {
    fn decode(&self, stdout: &str) -> Vec<FailureDetail> {
        let Some(offset) = stdout.find(XML_MARKER) else {
            return Vec::new();
        };

        let doc = match Document::parse(&stdout[offset..]) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed result payload");
                return Vec::new();
            }
        };

        doc.descendants()
            .filter(|n| n.has_tag_name("FailedTest"))
            .filter_map(|n| {
                let detail = failure_from_node(n);
                if detail.is_none() {
                    debug!("Skipping incomplete FailedTest record");
                }
                detail
            })
            .collect()
    }
}

fn failure_from_node(node: Node<'_, '_>) -> Option<FailureDetail> {
    let location = child_element(node, "Location")?;
    let line = child_text(location, "Line")?.trim().parse().ok()?;

    Some(FailureDetail {
        test_name: child_text(node, "Name")?,
        failure_type: child_text(node, "FailureType")?,
        location: FailureLocation {
            file: child_text(location, "File")?,
            line,
        },
        message: child_text(node, "Message")?,
    })
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name(name))
}

/// Concatenated text content of a direct child element ("" when empty)
fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    let element = child_element(node, name)?;
    Some(
        element
            .descendants()
            .filter(|d| d.is_text())
            .filter_map(|d| d.text())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FAILURES: &str = r#"Running 5 tests
[ OK ] vector_new
<?xml version="1.0" encoding="UTF-8"?>
<TestRun>
  <FailedTest id="1">
    <Name>vector_push</Name>
    <FailureType>Assertion</FailureType>
    <Location>
      <File>tests/vec_test.cpp</File>
      <Line>42</Line>
    </Location>
    <Message>expected 3, got 2</Message>
  </FailedTest>
  <FailedTest id="2">
    <Name>map_erase</Name>
    <FailureType>Exception</FailureType>
    <Location>
      <File>tests/map_test.cpp</File>
      <Line> 7 </Line>
    </Location>
    <Message><![CDATA[std::out_of_range: key <missing>]]></Message>
  </FailedTest>
  <Statistics><Tests>5</Tests><Failures>2</Failures></Statistics>
</TestRun>
"#;

    #[test]
    fn test_empty_stdout() {
        assert!(XmlFailureDecoder.decode("").is_empty());
    }

    #[test]
    fn test_plain_text_without_payload() {
        assert!(XmlFailureDecoder.decode("plain text with no xml").is_empty());
        assert!(XmlFailureDecoder.decode("All 12 tests passed\n<not xml>").is_empty());
    }

    #[test]
    fn test_two_failures() {
        let failures = XmlFailureDecoder.decode(TWO_FAILURES);

        assert_eq!(failures.len(), 2);

        assert_eq!(failures[0].test_name, "vector_push");
        assert_eq!(failures[0].failure_type, "Assertion");
        assert_eq!(failures[0].location.file, "tests/vec_test.cpp");
        assert_eq!(failures[0].location.line, 42);
        assert_eq!(failures[0].message, "expected 3, got 2");

        assert_eq!(failures[1].test_name, "map_erase");
        assert_eq!(failures[1].failure_type, "Exception");
        assert_eq!(failures[1].location.to_string(), "tests/map_test.cpp:7");
        assert_eq!(failures[1].message, "std::out_of_range: key <missing>");
    }

    #[test]
    fn test_payload_without_failures() {
        let stdout = "<?xml version=\"1.0\"?><TestRun><Statistics/></TestRun>";
        assert!(XmlFailureDecoder.decode(stdout).is_empty());
    }

    #[test]
    fn test_malformed_payload_is_swallowed() {
        let stdout = "boom\n<?xml version=\"1.0\"?><TestRun><FailedTest><Name>x</Name>";
        assert!(XmlFailureDecoder.decode(stdout).is_empty());
    }

    #[test]
    fn test_incomplete_record_is_skipped() {
        let stdout = r#"<?xml version="1.0"?>
<TestRun>
  <FailedTest><Name>no_location</Name><FailureType>A</FailureType><Message>m</Message></FailedTest>
  <FailedTest>
    <Name>bad_line</Name><FailureType>A</FailureType>
    <Location><File>f.cpp</File><Line>forty</Line></Location>
    <Message>m</Message>
  </FailedTest>
  <FailedTest>
    <Name>complete</Name><FailureType>A</FailureType>
    <Location><File>f.cpp</File><Line>1</Line></Location>
    <Message></Message>
  </FailedTest>
</TestRun>"#;
        let failures = XmlFailureDecoder.decode(stdout);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_name, "complete");
        assert_eq!(failures[0].message, "");
    }
}
