//! Thin quick-xml writer shared by the SAF-T exporter and the AT SOAP client.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rust_decimal::Decimal;
use std::io::Cursor;

use crate::core::{FiscalError, format_amount};

pub(crate) fn xml_err(e: impl std::fmt::Display) -> FiscalError {
    FiscalError::Xml(e.to_string())
}

pub(crate) struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    /// Indented writer with an XML declaration.
    pub fn new() -> Result<Self, FiscalError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        Ok(Self { writer })
    }

    /// Compact writer without declaration (SOAP bodies).
    pub fn compact() -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        }
    }

    pub fn into_string(self) -> Result<String, FiscalError> {
        let buf = self.writer.into_inner().into_inner();
        String::from_utf8(buf).map_err(|e| FiscalError::Xml(format!("UTF-8 error: {e}")))
    }

    pub fn start_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_err)?;
        Ok(self)
    }

    pub fn start_element_with_attrs(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_err)?;
        Ok(self)
    }

    pub fn end_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)?;
        Ok(self)
    }

    pub fn text_element(&mut self, name: &str, text: &str) -> Result<&mut Self, FiscalError> {
        self.start_element(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
        self.end_element(name)
    }

    /// Skip the element entirely when `text` is `None` or blank.
    pub fn optional_element(
        &mut self,
        name: &str,
        text: Option<&str>,
    ) -> Result<&mut Self, FiscalError> {
        match text.filter(|t| !t.trim().is_empty()) {
            Some(t) => self.text_element(name, t),
            None => Ok(self),
        }
    }

    /// Monetary value with exactly two decimals.
    pub fn amount_element(&mut self, name: &str, amount: Decimal) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_amount(amount))
    }

    pub fn decimal_element(&mut self, name: &str, value: Decimal) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_decimal(value))
    }
}

/// Format a Decimal for quantities and prices: at least 2 decimal places,
/// trailing zeros beyond that stripped.
pub(crate) fn format_decimal(d: Decimal) -> String {
    let s = d.normalize().to_string();
    if let Some(dot_pos) = s.find('.') {
        let decimals = s.len() - dot_pos - 1;
        if decimals < 2 {
            format!("{s}{}", "0".repeat(2 - decimals))
        } else {
            s
        }
    } else {
        format!("{s}.00")
    }
}

/// Local part of a possibly prefixed element name.
pub(crate) fn local_name(qname: &[u8]) -> String {
    let name = std::str::from_utf8(qname).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn format_decimal_cases() {
        assert_eq!(format_decimal(dec!(100)), "100.00");
        assert_eq!(format_decimal(dec!(2.5)), "2.50");
        assert_eq!(format_decimal(dec!(0.125)), "0.125");
    }

    #[test]
    fn optional_and_amount_elements() {
        let mut w = XmlWriter::compact();
        w.start_element("R").unwrap();
        w.optional_element("Skip", None).unwrap();
        w.optional_element("Blank", Some("  ")).unwrap();
        w.optional_element("Keep", Some("x & y")).unwrap();
        w.amount_element("Total", dec!(7.5)).unwrap();
        w.end_element("R").unwrap();
        assert_eq!(
            w.into_string().unwrap(),
            "<R><Keep>x &amp; y</Keep><Total>7.50</Total></R>"
        );
    }

    #[test]
    fn local_names() {
        assert_eq!(local_name(b"soapenv:Envelope"), "Envelope");
        assert_eq!(local_name(b"AuditFile"), "AuditFile");
    }
}
