/// A file stored inline with its row
#[derive(Debug, Clone, PartialEq, Eq, diesel::Queryable)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub filename: String,
    pub mimetype: String,
}

impl Attachment {
    pub fn new(data: Vec<u8>, filename: impl Into<String>, mimetype: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
            mimetype: mimetype.into(),
        }
    }
}
