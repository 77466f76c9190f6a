//! SOAP envelopes and responses of the AT series web service.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::core::{DocumentType, FiscalError};
use crate::series::{SeriesInfo, SeriesRegistration};
use crate::xml_utils::{XmlWriter, local_name, xml_err};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const AT_SERVICE_NS: &str = "http://at.gov.pt/";
pub const WSSE_NS: &str = "http://schemas.xmlsoap.org/ws/2002/12/secext";

/// WS-Security `UsernameToken` as AT expects it: the password encrypted
/// with the AT public key (RSA-OAEP, SHA-1) and base64 encoded.
#[derive(Clone)]
pub struct UsernameToken {
    pub username: String,
    pub encrypted_password: String,
    pub nonce: String,
    pub created: DateTime<Utc>,
}

impl std::fmt::Debug for UsernameToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernameToken")
            .field("username", &self.username)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl UsernameToken {
    /// Fresh token: new nonce, current timestamp.
    pub fn new(
        username: &str,
        password: &str,
        at_public_key: &RsaPublicKey,
    ) -> Result<Self, FiscalError> {
        let encrypted = at_public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), password.as_bytes())
            .map_err(|e| FiscalError::Config(format!("cannot encrypt AT password: {e}")))?;

        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);

        Ok(Self {
            username: username.to_string(),
            encrypted_password: STANDARD.encode(encrypted),
            nonce: STANDARD.encode(nonce),
            created: Utc::now(),
        })
    }

    fn created_str(&self) -> String {
        self.created.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

/// One AT series operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Consult,
    Void,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register => "registarSerie",
            Self::Consult => "consultarSeries",
            Self::Void => "anularSerie",
        }
    }

    pub fn soap_action(&self) -> String {
        format!("{AT_SERVICE_NS}{}", self.name())
    }
}

fn envelope(
    token: &UsernameToken,
    op: Operation,
    body: impl FnOnce(&mut XmlWriter) -> Result<(), FiscalError>,
) -> Result<String, FiscalError> {
    let mut w = XmlWriter::compact();
    w.start_element_with_attrs(
        "soapenv:Envelope",
        &[("xmlns:soapenv", SOAP_ENV_NS), ("xmlns:ser", AT_SERVICE_NS)],
    )?;

    w.start_element("soapenv:Header")?;
    w.start_element_with_attrs("wss:Security", &[("xmlns:wss", WSSE_NS)])?;
    w.start_element("wss:UsernameToken")?;
    w.text_element("wss:Username", &token.username)?;
    w.text_element("wss:Password", &token.encrypted_password)?;
    w.text_element("wss:Nonce", &token.nonce)?;
    w.text_element("wss:Created", &token.created_str())?;
    w.end_element("wss:UsernameToken")?;
    w.end_element("wss:Security")?;
    w.end_element("soapenv:Header")?;

    w.start_element("soapenv:Body")?;
    let tag = format!("ser:{}", op.name());
    w.start_element(&tag)?;
    body(&mut w)?;
    w.end_element(&tag)?;
    w.end_element("soapenv:Body")?;

    w.end_element("soapenv:Envelope")?;
    w.into_string()
}

pub fn register_envelope(
    token: &UsernameToken,
    req: &SeriesRegistration,
) -> Result<String, FiscalError> {
    envelope(token, Operation::Register, |w| {
        w.text_element("serie", &req.series_code)?;
        w.text_element("tipoSerie", req.series_type.code())?;
        w.text_element("classeDoc", req.doc_type.class().code())?;
        w.text_element("tipoDoc", req.doc_type.code())?;
        w.text_element("numInicialSeq", &req.first_number.to_string())?;
        w.text_element("dataInicioPrevUtiliz", &req.expected_start.to_string())?;
        w.text_element("numCertSWFatur", &req.software_certificate)?;
        w.text_element("meioProcessamento", &req.processing_means)?;
        Ok(())
    })
}

pub fn consult_envelope(
    token: &UsernameToken,
    series_code: &str,
    doc_type: DocumentType,
) -> Result<String, FiscalError> {
    envelope(token, Operation::Consult, |w| {
        w.text_element("serie", series_code)?;
        w.text_element("classeDoc", doc_type.class().code())?;
        w.text_element("tipoDoc", doc_type.code())?;
        Ok(())
    })
}

pub fn void_envelope(
    token: &UsernameToken,
    series_code: &str,
    doc_type: DocumentType,
    validation_code: &str,
    reason: &str,
) -> Result<String, FiscalError> {
    envelope(token, Operation::Void, |w| {
        w.text_element("serie", series_code)?;
        w.text_element("classeDoc", doc_type.class().code())?;
        w.text_element("tipoDoc", doc_type.code())?;
        w.text_element("codValidacaoSerie", validation_code)?;
        w.text_element("motivo", reason)?;
        w.text_element("declaracaoNaoEmissao", "true")?;
        Ok(())
    })
}

/// Fields of interest in an AT series response, matched by local name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtResponse {
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub series_code: Option<String>,
    pub doc_type: Option<String>,
    pub validation_code: Option<String>,
    pub state: Option<String>,
    pub first_number: Option<u64>,
    /// `listaErros` entries as (codErro, msgErro).
    pub errors: Vec<(String, String)>,
    pub fault: Option<String>,
}

impl AtResponse {
    pub fn parse(xml: &str) -> Result<Self, FiscalError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut resp = AtResponse::default();
        let mut current = String::new();
        let mut pending_error: Option<String> = None;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(ref e) => current = local_name(e.name().as_ref()),
                Event::Text(ref e) => {
                    let text = e.unescape().map_err(xml_err)?.to_string();
                    match current.as_str() {
                        "codResultOper" => resp.result_code = Some(text),
                        "msgResultOper" => resp.result_message = Some(text),
                        "serie" => resp.series_code = Some(text),
                        "tipoDoc" => resp.doc_type = Some(text),
                        "codValidacaoSerie" => resp.validation_code = Some(text),
                        "estado" => resp.state = Some(text),
                        "numInicialSeq" => resp.first_number = text.parse().ok(),
                        "codErro" => pending_error = Some(text),
                        "msgErro" => {
                            let code = pending_error.take().unwrap_or_default();
                            resp.errors.push((code, text));
                        }
                        "faultstring" => resp.fault = Some(text),
                        _ => {}
                    }
                }
                Event::End(_) => current.clear(),
                Event::Eof => break,
                _ => {}
            }
        }
        if let Some(code) = pending_error {
            resp.errors.push((code, String::new()));
        }
        Ok(resp)
    }

    /// Turn faults and business-rule errors into [`FiscalError::ExternalService`].
    pub fn into_result(self) -> Result<Self, FiscalError> {
        if let Some(fault) = &self.fault {
            return Err(FiscalError::ExternalService(format!("SOAP fault: {fault}")));
        }
        if !self.errors.is_empty() {
            let msg = self
                .errors
                .iter()
                .map(|(code, msg)| format!("{code}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FiscalError::ExternalService(msg));
        }
        Ok(self)
    }

    /// Validation code returned by `registarSerie`.
    pub fn into_validation_code(self) -> Result<String, FiscalError> {
        let resp = self.into_result()?;
        match resp.validation_code.filter(|c| !c.trim().is_empty()) {
            Some(code) => Ok(code),
            None => Err(FiscalError::ExternalService(format!(
                "AT returned no validation code ({}: {})",
                resp.result_code.as_deref().unwrap_or("-"),
                resp.result_message.as_deref().unwrap_or("no message"),
            ))),
        }
    }

    pub fn into_series_info(
        self,
        series_code: &str,
        doc_type: DocumentType,
    ) -> Result<SeriesInfo, FiscalError> {
        let resp = self.into_result()?;
        Ok(SeriesInfo {
            series_code: resp.series_code.unwrap_or_else(|| series_code.to_string()),
            doc_type: resp.doc_type.unwrap_or_else(|| doc_type.code().to_string()),
            validation_code: resp.validation_code,
            state: resp.state,
            first_number: resp.first_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesType;
    use chrono::NaiveDate;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};

    const KEY: &str = include_str!("../../tests/data/signing_key.pem");
    const AT_KEY: &str = include_str!("../../tests/data/at_public_key.pem");

    fn token() -> UsernameToken {
        let pk = RsaPublicKey::from_public_key_pem(AT_KEY).unwrap();
        UsernameToken::new("501442600/1", "segredo", &pk).unwrap()
    }

    #[test]
    fn password_is_oaep_encrypted_for_at() {
        let t = token();
        let ct = STANDARD.decode(&t.encrypted_password).unwrap();
        let sk = RsaPrivateKey::from_pkcs8_pem(KEY).unwrap();
        let pt = sk.decrypt(Oaep::new::<Sha1>(), &ct).unwrap();
        assert_eq!(pt, b"segredo");
        assert_eq!(STANDARD.decode(&t.nonce).unwrap().len(), 16);
        assert!(!format!("{t:?}").contains(&t.encrypted_password));
    }

    #[test]
    fn register_envelope_fields() {
        let req = SeriesRegistration {
            series_code: "A2024".into(),
            series_type: SeriesType::Normal,
            doc_type: DocumentType::CreditNote,
            first_number: 1,
            expected_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            software_certificate: "9999".into(),
            processing_means: "PI".into(),
        };
        let xml = register_envelope(&token(), &req).unwrap();
        assert!(xml.starts_with("<soapenv:Envelope"));
        assert!(xml.contains("<wss:Username>501442600/1</wss:Username>"));
        assert!(xml.contains("<ser:registarSerie><serie>A2024</serie><tipoSerie>N</tipoSerie><classeDoc>SI</classeDoc><tipoDoc>NC</tipoDoc>"));
        assert!(xml.contains("<dataInicioPrevUtiliz>2024-01-01</dataInicioPrevUtiliz>"));
        assert!(!xml.contains("segredo"));
    }

    #[test]
    fn void_envelope_carries_reason() {
        let xml = void_envelope(&token(), "A2024", DocumentType::Invoice, "AT7B3C9X", "ER").unwrap();
        assert!(xml.contains("<ser:anularSerie>"));
        assert!(xml.contains("<codValidacaoSerie>AT7B3C9X</codValidacaoSerie><motivo>ER</motivo>"));
    }

    #[test]
    fn parses_successful_registration() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body>
            <ns2:registarSerieResp xmlns:ns2="http://at.gov.pt/">
              <infoResultOper><codResultOper>2001</codResultOper><msgResultOper>Operacao efetuada com sucesso</msgResultOper></infoResultOper>
              <infoSerie><serie>A2024</serie><tipoDoc>FT</tipoDoc><numInicialSeq>1</numInicialSeq><codValidacaoSerie>AAJFJMVNTN</codValidacaoSerie><estado>A</estado></infoSerie>
            </ns2:registarSerieResp></S:Body></S:Envelope>"#;
        let resp = AtResponse::parse(xml).unwrap();
        assert_eq!(resp.result_code.as_deref(), Some("2001"));
        assert_eq!(resp.first_number, Some(1));
        assert_eq!(resp.into_validation_code().unwrap(), "AAJFJMVNTN");
    }

    #[test]
    fn business_errors_and_faults() {
        let xml = r#"<Envelope><Body><registarSerieResp><listaErros>
            <Erro><codErro>4001</codErro><msgErro>Serie ja existe</msgErro></Erro>
            <Erro><codErro>4002</codErro><msgErro>Data invalida</msgErro></Erro>
            </listaErros></registarSerieResp></Body></Envelope>"#;
        let err = AtResponse::parse(xml).unwrap().into_validation_code().unwrap_err();
        assert_eq!(
            err.to_string(),
            "AT service error: 4001: Serie ja existe; 4002: Data invalida"
        );

        let fault = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Client</faultcode><faultstring>Autenticacao falhou</faultstring></soap:Fault></soap:Body></soap:Envelope>"#;
        let err = AtResponse::parse(fault).unwrap().into_result().unwrap_err();
        assert!(err.to_string().contains("Autenticacao falhou"));
    }

    #[test]
    fn missing_code_is_an_error() {
        let xml = "<r><codResultOper>3001</codResultOper><msgResultOper>Pedido invalido</msgResultOper></r>";
        let err = AtResponse::parse(xml).unwrap().into_validation_code().unwrap_err();
        assert!(err.to_string().contains("3001: Pedido invalido"));
    }
}
