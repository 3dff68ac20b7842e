//! Detection vocabulary: entity types, token types and file formats.
//!
//! Each is a closed set; lookups from wire strings return `Option` and
//! callers decide how to report an unknown name.

use serde::{Serialize, Serializer};

use crate::ToolError;

/// Kinds of sensitive data the upstream service can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    AccountNumber,
    Age,
    All,
    BankAccount,
    BloodType,
    Condition,
    CreditCard,
    CreditCardExpiration,
    Cvv,
    Date,
    Dob,
    DriverLicense,
    Drug,
    EmailAddress,
    Gender,
    HealthcareNumber,
    IpAddress,
    Location,
    LocationAddress,
    LocationCity,
    LocationCountry,
    LocationState,
    LocationZip,
    MedicalCode,
    Money,
    Name,
    NameFamily,
    NameGiven,
    Occupation,
    Organization,
    PassportNumber,
    Password,
    PhoneNumber,
    RoutingNumber,
    Ssn,
    Url,
    Username,
    VehicleId,
}

impl EntityType {
    pub const ALL: &[EntityType] = &[
        Self::AccountNumber,
        Self::Age,
        Self::All,
        Self::BankAccount,
        Self::BloodType,
        Self::Condition,
        Self::CreditCard,
        Self::CreditCardExpiration,
        Self::Cvv,
        Self::Date,
        Self::Dob,
        Self::DriverLicense,
        Self::Drug,
        Self::EmailAddress,
        Self::Gender,
        Self::HealthcareNumber,
        Self::IpAddress,
        Self::Location,
        Self::LocationAddress,
        Self::LocationCity,
        Self::LocationCountry,
        Self::LocationState,
        Self::LocationZip,
        Self::MedicalCode,
        Self::Money,
        Self::Name,
        Self::NameFamily,
        Self::NameGiven,
        Self::Occupation,
        Self::Organization,
        Self::PassportNumber,
        Self::Password,
        Self::PhoneNumber,
        Self::RoutingNumber,
        Self::Ssn,
        Self::Url,
        Self::Username,
        Self::VehicleId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountNumber => "account_number",
            Self::Age => "age",
            Self::All => "all",
            Self::BankAccount => "bank_account",
            Self::BloodType => "blood_type",
            Self::Condition => "condition",
            Self::CreditCard => "credit_card",
            Self::CreditCardExpiration => "credit_card_expiration",
            Self::Cvv => "cvv",
            Self::Date => "date",
            Self::Dob => "dob",
            Self::DriverLicense => "driver_license",
            Self::Drug => "drug",
            Self::EmailAddress => "email_address",
            Self::Gender => "gender",
            Self::HealthcareNumber => "healthcare_number",
            Self::IpAddress => "ip_address",
            Self::Location => "location",
            Self::LocationAddress => "location_address",
            Self::LocationCity => "location_city",
            Self::LocationCountry => "location_country",
            Self::LocationState => "location_state",
            Self::LocationZip => "location_zip",
            Self::MedicalCode => "medical_code",
            Self::Money => "money",
            Self::Name => "name",
            Self::NameFamily => "name_family",
            Self::NameGiven => "name_given",
            Self::Occupation => "occupation",
            Self::Organization => "organization",
            Self::PassportNumber => "passport_number",
            Self::Password => "password",
            Self::PhoneNumber => "phone_number",
            Self::RoutingNumber => "routing_number",
            Self::Ssn => "ssn",
            Self::Url => "url",
            Self::Username => "username",
            Self::VehicleId => "vehicle_id",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
    }

    /// Wire names, for schema enums.
    pub fn wire_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|e| e.as_str()).collect()
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How detected values are replaced in processed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    /// Values are stored in the vault and replaced by re-identifiable tokens.
    #[default]
    VaultToken,
    /// Values are replaced by `<ENTITY_n>` placeholders.
    EntityUniqueCounter,
    /// Values are replaced by their entity type only.
    EntityOnly,
}

impl TokenType {
    pub const ALL: &[TokenType] = &[Self::VaultToken, Self::EntityUniqueCounter, Self::EntityOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VaultToken => "vault_token",
            Self::EntityUniqueCounter => "entity_unq_counter",
            Self::EntityOnly => "entity_only",
        }
    }

    /// Wire names, for schema enums.
    pub fn wire_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name.trim())
    }
}

impl Serialize for TokenType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// File formats accepted for file de-identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    Txt,
    Doc,
    Docx,
    Csv,
    Json,
    Xml,
    Xls,
    Xlsx,
    Ppt,
    Pptx,
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Mp3,
    Wav,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Ppt => "ppt",
            Self::Pptx => "pptx",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    /// Map a file extension (with or without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        let format = match ext.as_str() {
            "pdf" => Self::Pdf,
            "txt" | "text" => Self::Txt,
            "doc" => Self::Doc,
            "docx" => Self::Docx,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "xls" => Self::Xls,
            "xlsx" => Self::Xlsx,
            "ppt" => Self::Ppt,
            "pptx" => Self::Pptx,
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "bmp" => Self::Bmp,
            "tif" | "tiff" => Self::Tiff,
            "mp3" => Self::Mp3,
            "wav" => Self::Wav,
            _ => return None,
        };
        Some(format)
    }

    /// Format implied by a file name's extension.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

/// Parse optional entity names. Unknown names are reported all at once.
pub fn parse_entity_types(names: Option<&[String]>) -> Result<Option<Vec<EntityType>>, ToolError> {
    let Some(names) = names else {
        return Ok(None);
    };

    let mut known = Vec::with_capacity(names.len());
    let mut unknown = Vec::new();
    for name in names {
        match EntityType::from_wire(name) {
            Some(entity) if !known.contains(&entity) => known.push(entity),
            Some(_) => {}
            None => unknown.push(name.as_str()),
        }
    }

    if !unknown.is_empty() {
        return Err(ToolError::domain(format!(
            "Unsupported entity types: {}",
            unknown.join(", ")
        )));
    }
    Ok(if known.is_empty() { None } else { Some(known) })
}

/// Parse an optional token type name, defaulting to vault tokens.
pub fn parse_token_type(name: Option<&str>) -> Result<TokenType, ToolError> {
    match name {
        None => Ok(TokenType::default()),
        Some(name) => TokenType::from_wire(name).ok_or_else(|| {
            ToolError::domain(format!(
                "Unsupported token type: {name} (expected one of {})",
                TokenType::wire_names().join(", ")
            ))
        }),
    }
}
