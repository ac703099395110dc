//! A minimal, ad hoc definition grammar used only by this demo: one line of the form
//! `NodeName:PortName:direction:signature`, parsed into exactly one port. The real
//! text grammar this stands in for is an external collaborator as far as the routing
//! core is concerned; this is just enough of one to drive the measurement below.

use apx_core::{DefinitionParser, Error, NodeParseTree, ParsedPort, PortDirection, Result};

pub struct LineDefinitionParser;

impl DefinitionParser for LineDefinitionParser {
    fn parse(&self, text: &[u8]) -> Result<NodeParseTree> {
        let text =
            std::str::from_utf8(text).map_err(|_| Error::ParseError("definition is not valid UTF-8".into()))?;
        let mut parts = text.trim().splitn(4, ':');
        let node_name = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ParseError("missing node name".into()))?
            .to_string();
        let port_name = parts
            .next()
            .ok_or_else(|| Error::ParseError("missing port name".into()))?
            .to_string();
        let direction = match parts.next() {
            Some("provide") => PortDirection::Provide,
            Some("require") => PortDirection::Require,
            other => return Err(Error::ParseError(format!("unknown port direction {other:?}"))),
        };
        let signature = parts
            .next()
            .ok_or_else(|| Error::ParseError("missing port signature".into()))?
            .to_string();
        Ok(NodeParseTree {
            node_name,
            ports: vec![ParsedPort {
                name: port_name,
                direction,
                signature,
                init_value: Vec::new(),
                queue_length: 0,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apx_core::PortDirection;

    #[test]
    fn parses_a_provide_port() {
        let tree = LineDefinitionParser.parse(b"Producer:Counter:provide:u32").unwrap();
        assert_eq!(tree.node_name, "Producer");
        assert_eq!(tree.ports[0].name, "Counter");
        assert_eq!(tree.ports[0].direction, PortDirection::Provide);
        assert_eq!(tree.ports[0].signature, "u32");
    }

    #[test]
    fn rejects_unknown_direction() {
        assert!(LineDefinitionParser.parse(b"Producer:Counter:sideways:u32").is_err());
    }
}
