//! Namespace-agnostic XML field extraction
//!
//! ONVIF replies arrive with vendor-dependent namespace prefixes; parsing
//! extracts only the fields the product uses, so plain string matching is
//! enough and no XML object model is introduced.

/// Extract the text content of the first element named `tag`, regardless of
/// namespace prefix (`<tds:Year>`, `<tt:Year>`, `<Year>`, ...).
pub fn extract_value(xml: &str, tag: &str) -> Option<String> {
    // Prefixed form: ":Tag>" catches any namespace
    let prefixed = format!(":{tag}>");
    if let Some(start) = xml.find(&prefixed) {
        let content_start = start + prefixed.len();
        if let Some(end) = xml[content_start..].find("</") {
            let value = xml[content_start..content_start + end].trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    // Unprefixed form
    let plain = format!("<{tag}>");
    if let Some(start) = xml.find(&plain) {
        let content_start = start + plain.len();
        let close = format!("</{tag}>");
        if let Some(end) = xml[content_start..].find(&close) {
            let value = xml[content_start..content_start + end].trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    None
}

/// Extract the text content of `tag` parsed as an integer.
pub fn extract_int(xml: &str, tag: &str) -> Option<i32> {
    extract_value(xml, tag)?.parse().ok()
}

/// Extract the value of attribute `attr` on the first element named `tag`.
pub fn extract_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    // Locate the opening tag, prefixed or not
    let candidates = [format!("<{tag}"), format!(":{tag}")];

    for pattern in &candidates {
        let mut search_from = 0;
        while let Some(rel) = xml[search_from..].find(pattern.as_str()) {
            let tag_start = search_from + rel;
            let after = &xml[tag_start + pattern.len()..];
            // The match must be a full tag name boundary
            if !after.starts_with(' ') && !after.starts_with('>') && !after.starts_with('\t') {
                search_from = tag_start + pattern.len();
                continue;
            }
            let tag_end = match after.find('>') {
                Some(idx) => idx,
                None => return None,
            };
            let tag_content = &after[..tag_end];

            let attr_pattern = format!("{attr}=");
            if let Some(attr_start) = tag_content.find(&attr_pattern) {
                let after_attr = &tag_content[attr_start + attr_pattern.len()..];
                let quote = after_attr.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let rest = &after_attr[1..];
                    if let Some(val_end) = rest.find(quote) {
                        return Some(rest[..val_end].to_string());
                    }
                }
            }
            search_from = tag_start + pattern.len();
        }
    }

    None
}

/// Extract the inner XML of the first element named `section`, e.g. the
/// `<PTZ>...</PTZ>` block of a GetCapabilities reply.
pub fn extract_section<'a>(xml: &'a str, section: &str) -> Option<&'a str> {
    let patterns = [format!("<{section}>"), format!(":{section}>")];

    for pattern in &patterns {
        if let Some(start) = xml.find(pattern.as_str()) {
            let content_start = start + pattern.len();
            let close = format!("</{section}");
            // Prefixed close tags still end with ":{section}>"
            let prefixed_close = format!(":{section}>");
            let rest = &xml[content_start..];

            let end = rest
                .find(&close)
                .or_else(|| rest.find(&prefixed_close).and_then(|idx| {
                    // Walk back to the "</" that opens this close tag
                    rest[..idx].rfind("</")
                }));

            if let Some(end) = end {
                return Some(&rest[..end]);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES_REPLY: &str = r#"<SOAP-ENV:Envelope>
  <SOAP-ENV:Body>
    <trt:GetProfilesResponse>
      <trt:Profiles token="Profile_1" fixed="true">
        <tt:Name>mainStream</tt:Name>
      </trt:Profiles>
      <trt:Profiles token="Profile_2" fixed="true">
        <tt:Name>subStream</tt:Name>
      </trt:Profiles>
    </trt:GetProfilesResponse>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    const STREAM_URI_REPLY: &str = r#"<SOAP-ENV:Envelope>
  <SOAP-ENV:Body>
    <trt:GetStreamUriResponse>
      <trt:MediaUri>
        <tt:Uri>rtsp://192.0.2.10:554/stream1</tt:Uri>
      </trt:MediaUri>
    </trt:GetStreamUriResponse>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    const CAPABILITIES_REPLY: &str = r#"<SOAP-ENV:Envelope>
  <SOAP-ENV:Body>
    <tds:GetCapabilitiesResponse>
      <tds:Capabilities>
        <tt:Media>
          <tt:XAddr>http://192.0.2.10/onvif/media_service</tt:XAddr>
        </tt:Media>
        <tt:PTZ>
          <tt:XAddr>http://192.0.2.10/onvif/ptz_service</tt:XAddr>
        </tt:PTZ>
      </tds:Capabilities>
    </tds:GetCapabilitiesResponse>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn extracts_prefixed_value() {
        assert_eq!(
            extract_value(STREAM_URI_REPLY, "Uri"),
            Some("rtsp://192.0.2.10:554/stream1".to_string())
        );
    }

    #[test]
    fn extracts_unprefixed_value() {
        let xml = "<Envelope><Year>2026</Year></Envelope>";
        assert_eq!(extract_value(xml, "Year"), Some("2026".to_string()));
        assert_eq!(extract_int(xml, "Year"), Some(2026));
    }

    #[test]
    fn missing_value_is_none() {
        assert_eq!(extract_value(STREAM_URI_REPLY, "Token"), None);
    }

    #[test]
    fn extracts_first_profile_token_in_document_order() {
        assert_eq!(
            extract_attribute(PROFILES_REPLY, "Profiles", "token"),
            Some("Profile_1".to_string())
        );
    }

    #[test]
    fn attribute_requires_tag_name_boundary() {
        // "ProfilesResponse" must not satisfy a "Profiles" lookup on its own
        let xml = r#"<trt:GetProfilesResponse token="wrong"/>"#;
        assert_eq!(extract_attribute(xml, "Profiles", "token"), None);
    }

    #[test]
    fn ptz_section_yields_its_own_xaddr() {
        let section = extract_section(CAPABILITIES_REPLY, "PTZ").unwrap();
        assert_eq!(
            extract_value(section, "XAddr"),
            Some("http://192.0.2.10/onvif/ptz_service".to_string())
        );
        // Media xaddr does not leak into the PTZ section
        assert!(!section.contains("media_service"));
    }

    #[test]
    fn absent_section_is_none() {
        let xml = "<Capabilities><Media><XAddr>x</XAddr></Media></Capabilities>";
        assert!(extract_section(xml, "PTZ").is_none());
    }
}
