//! Multipart parsing and payload validation shared by the results and documents views
//!
//! A payload is accepted only when its declared MIME type (or, failing that, the type guessed
//! from its filename) is allowed for the upload kind *and* matches what its first bytes say.

use std::collections::HashMap;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use clubsite_models::Attachment;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::error::ClubsiteError;

/// Room left in the request body limit for the text fields and multipart framing
pub(crate) const FORM_OVERHEAD: usize = 64 * 1024;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Error)]
pub(in crate::views) enum UploadError {
    #[error("Invalid multipart content: {0}")]
    Multipart(#[source] MultipartError),

    #[error("Missing multipart field name, cannot process request")]
    MissingFieldName,

    #[error("Unrecognized multipart field '{field_name}'")]
    UnrecognizedField { field_name: String },

    #[error("Missing multipart field '{field}'")]
    MissingField { field: &'static str },

    #[error("Multipart field '{field}' was sent more than once")]
    DuplicateField { field: &'static str },

    #[error("Could not read multipart field '{field}' as text: {source}")]
    InvalidText {
        field: &'static str,
        #[source]
        source: MultipartError,
    },

    #[error("Multipart field '{field}' has no filename")]
    MissingFileName { field: &'static str },

    #[error("Multipart field '{field}' is empty")]
    EmptyFile { field: &'static str },

    #[error("File exceeds the maximum upload size of {max_size} bytes")]
    FileTooLarge { max_size: usize },

    #[error("Unsupported media type '{mimetype}', expected one of {allowed:?}")]
    UnsupportedMediaType {
        mimetype: String,
        allowed: &'static [&'static str],
    },

    #[error("File content does not match the declared media type '{declared}'")]
    ContentMismatch {
        declared: String,
        detected: Option<&'static str>,
    },
}

impl UploadError {
    fn from_multipart(source: MultipartError, max_size: usize) -> Self {
        if source.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::FileTooLarge { max_size }
        } else {
            Self::Multipart(source)
        }
    }
}

impl ClubsiteError for UploadError {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType { .. } | Self::ContentMismatch { .. } => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::Multipart(_) => "clubsite:upload:InvalidMultipart",
            Self::MissingFieldName => "clubsite:upload:MissingFieldName",
            Self::UnrecognizedField { .. } => "clubsite:upload:UnrecognizedField",
            Self::MissingField { .. } => "clubsite:upload:MissingField",
            Self::DuplicateField { .. } => "clubsite:upload:DuplicateField",
            Self::InvalidText { .. } => "clubsite:upload:InvalidText",
            Self::MissingFileName { .. } => "clubsite:upload:MissingFileName",
            Self::EmptyFile { .. } => "clubsite:upload:EmptyFile",
            Self::FileTooLarge { .. } => "clubsite:upload:FileTooLarge",
            Self::UnsupportedMediaType { .. } => "clubsite:upload:UnsupportedMediaType",
            Self::ContentMismatch { .. } => "clubsite:upload:ContentMismatch",
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::UnrecognizedField { field_name } => {
                HashMap::from([("field_name".to_owned(), json!(field_name))])
            }
            Self::MissingField { field }
            | Self::DuplicateField { field }
            | Self::InvalidText { field, .. }
            | Self::MissingFileName { field }
            | Self::EmptyFile { field } => HashMap::from([("field".to_owned(), json!(field))]),
            Self::FileTooLarge { max_size } => {
                HashMap::from([("max_size".to_owned(), json!(max_size))])
            }
            Self::UnsupportedMediaType { mimetype, allowed } => HashMap::from([
                ("mimetype".to_owned(), json!(mimetype)),
                ("allowed".to_owned(), json!(allowed)),
            ]),
            Self::ContentMismatch { declared, detected } => HashMap::from([
                ("declared".to_owned(), json!(declared)),
                ("detected".to_owned(), json!(detected)),
            ]),
            Self::Multipart(_) | Self::MissingFieldName => Default::default(),
        }
    }
}

/// What an upload field is allowed to contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::views) enum PayloadKind {
    Image,
    Pdf,
}

impl PayloadKind {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["image/jpeg", "image/png", "image/gif", "image/webp"],
            Self::Pdf => &["application/pdf"],
        }
    }

    /// The MIME type the content itself claims to be, if recognized
    fn sniff(self, data: &[u8]) -> Option<&'static str> {
        match self {
            Self::Image => match image::guess_format(data).ok()? {
                image::ImageFormat::Jpeg => Some("image/jpeg"),
                image::ImageFormat::Png => Some("image/png"),
                image::ImageFormat::Gif => Some("image/gif"),
                image::ImageFormat::WebP => Some("image/webp"),
                _ => None,
            },
            Self::Pdf => data.starts_with(PDF_MAGIC).then_some("application/pdf"),
        }
    }
}

#[derive(Debug)]
struct UploadedFile {
    data: Vec<u8>,
    filename: String,
    declared_mimetype: Option<String>,
}

/// The fields of a multipart form, read up front
#[derive(Debug)]
pub(in crate::views) struct UploadForm {
    texts: HashMap<&'static str, String>,
    file: Option<UploadedFile>,
    file_field: &'static str,
}

impl UploadForm {
    /// Reads every field of `form`
    ///
    /// Only `text_fields` and `file_field` are accepted, anything else is rejected.
    pub(in crate::views) async fn read(
        mut form: Multipart,
        text_fields: &[&'static str],
        file_field: &'static str,
        max_size: usize,
    ) -> Result<Self, UploadError> {
        let mut upload = Self {
            texts: HashMap::new(),
            file: None,
            file_field,
        };
        while let Some(field) = form
            .next_field()
            .await
            .map_err(|e| UploadError::from_multipart(e, max_size))?
        {
            let field_name = field
                .name()
                .ok_or(UploadError::MissingFieldName)?
                .to_owned();
            if field_name == file_field {
                if upload.file.is_some() {
                    return Err(UploadError::DuplicateField { field: file_field });
                }
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .filter(|name| !name.is_empty())
                    .ok_or(UploadError::MissingFileName { field: file_field })?;
                let declared_mimetype = field.content_type().map(str::to_owned);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| UploadError::from_multipart(e, max_size))?;
                if data.len() > max_size {
                    return Err(UploadError::FileTooLarge { max_size });
                }
                upload.file = Some(UploadedFile {
                    data: data.to_vec(),
                    filename,
                    declared_mimetype,
                });
                continue;
            }
            let Some(&known) = text_fields.iter().find(|known| **known == field_name) else {
                return Err(UploadError::UnrecognizedField { field_name });
            };
            if upload.texts.contains_key(known) {
                return Err(UploadError::DuplicateField { field: known });
            }
            let text = field
                .text()
                .await
                .map_err(|source| UploadError::InvalidText {
                    field: known,
                    source,
                })?;
            upload.texts.insert(known, text.trim().to_owned());
        }
        Ok(upload)
    }

    /// A text field that must be present and not blank
    pub(in crate::views) fn required(
        &mut self,
        field: &'static str,
    ) -> Result<String, UploadError> {
        self.optional(field)
            .ok_or(UploadError::MissingField { field })
    }

    /// A text field, `None` when absent or blank
    pub(in crate::views) fn optional(&mut self, field: &'static str) -> Option<String> {
        self.texts.remove(field).filter(|text| !text.is_empty())
    }

    /// A text field of a partial update
    ///
    /// Absent leaves the value untouched, blank clears it.
    pub(in crate::views) fn nullable(&mut self, field: &'static str) -> Option<Option<String>> {
        self.texts
            .remove(field)
            .map(|text| Some(text).filter(|text| !text.is_empty()))
    }

    /// The validated file payload, `None` if the form carried none
    pub(in crate::views) fn file(
        &mut self,
        kind: PayloadKind,
    ) -> Result<Option<Attachment>, UploadError> {
        self.file
            .take()
            .map(|file| validate(file, kind, self.file_field))
            .transpose()
    }

    /// Just like [UploadForm::file] but the payload is mandatory
    pub(in crate::views) fn required_file(
        &mut self,
        kind: PayloadKind,
    ) -> Result<Attachment, UploadError> {
        let field = self.file_field;
        self.file(kind)?
            .ok_or(UploadError::MissingField { field })
    }
}

fn validate(
    UploadedFile {
        data,
        filename,
        declared_mimetype,
    }: UploadedFile,
    kind: PayloadKind,
    field: &'static str,
) -> Result<Attachment, UploadError> {
    if data.is_empty() {
        return Err(UploadError::EmptyFile { field });
    }
    let mimetype = declared_mimetype
        .as_deref()
        .and_then(|declared| declared.parse::<mime::Mime>().ok())
        .filter(|declared| *declared != mime::APPLICATION_OCTET_STREAM)
        .or_else(|| mime_guess::from_path(&filename).first())
        .map(|mime| mime.essence_str().to_ascii_lowercase())
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
    let allowed = kind.allowed();
    if !allowed.contains(&mimetype.as_str()) {
        return Err(UploadError::UnsupportedMediaType { mimetype, allowed });
    }
    let detected = kind.sniff(&data);
    if detected != Some(mimetype.as_str()) {
        return Err(UploadError::ContentMismatch {
            declared: mimetype,
            detected,
        });
    }
    Ok(Attachment::new(data, filename, mimetype))
}

/// Keeps the last path component of a client-provided filename
fn sanitize_filename(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Serves a stored payload inline with its MIME type and filename
pub(in crate::views) fn attachment_response(
    Attachment {
        data,
        filename,
        mimetype,
    }: Attachment,
) -> Response {
    let filename: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    (
        [
            (header::CONTENT_TYPE, mimetype),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        data,
    )
        .into_response()
}

#[cfg(test)]
pub(in crate::views) mod fixtures {
    /// Smallest valid PNG signature plus an IHDR chunk header
    pub const PNG: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
    ];

    pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

    pub const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";
}
