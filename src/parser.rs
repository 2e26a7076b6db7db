// 🏗️ Parser Framework - registry feeds and dossier archives
//
// Registry: one CSV per entity type, optionally zipped, header row first.
// Archive: XML exports in two schemas (legacy e-depot and WABO), read into a
// small element tree and mapped onto DossierCase values.

use crate::enrichment::Enrichment;
use crate::entities::{
    Access, Address, Copyright, DirectPointer, DocumentRecord, DossierCase, DossierSource,
};
use crate::error::{Result, SyncError};
use crate::normalizer::RawRecord;
use crate::temporal::{date_from_year, parse_date};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

const TITLE_LIMIT: usize = 512;
const TYPE_LIMIT: usize = 255;
const FIELD_LIMIT: usize = 250;

// ============================================================================
// REGISTRY FEED
// ============================================================================

/// Read every row of a registry export (`.csv` or `.csv.zip`)
pub fn read_registry_file(path: &Path) -> Result<Vec<RawRecord>> {
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let bytes = if is_zip {
        read_csv_from_zip(path)?
    } else {
        std::fs::read(path)?
    };
    read_registry_csv(bytes.as_slice())
}

fn read_csv_from_zip(path: &Path) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.name().to_lowercase().ends_with(".csv") {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            return Ok(bytes);
        }
    }
    Err(SyncError::malformed(
        "registry",
        &path.display().to_string(),
        "zip archive contains no .csv entry",
    ))
}

pub fn read_registry_csv<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        // +2: 1-indexed plus header row
        rows.push(RawRecord::from_pairs(headers.iter().zip(record.iter()), index as u64 + 2));
    }
    Ok(rows)
}

// ============================================================================
// XML TREE
// ============================================================================

/// One element: name, concatenated text and child elements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(XmlNode {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                }),
                Event::Empty(e) => {
                    let node = XmlNode {
                        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                        ..Default::default()
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Text(t) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::End(_) => {
                    let Some(node) = stack.pop() else {
                        return Err(SyncError::malformed("xml", "document", "unbalanced end tag"));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SyncError::malformed("xml", "document", "unexpected end of document"));
        }
        root.ok_or_else(|| SyncError::malformed("xml", "document", "no root element"))
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of a child, `None` when missing or blank
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// `<container><item/><item/></container>` -> items; a single item and
    /// a missing container both work
    pub fn list_items(&self, container: &str, item: &str) -> Vec<&XmlNode> {
        match self.child(container) {
            Some(c) => c.children.iter().filter(|n| n.name == item).collect(),
            None => Vec::new(),
        }
    }

    /// Texts of list items, blanks dropped
    pub fn list_texts(&self, container: &str, item: &str) -> Vec<&str> {
        self.list_items(container, item)
            .into_iter()
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

/// (flag, value assumed when absent, value that restricts)
const ACCESS_FLAGS: [(&str, &str, &str); 4] = [
    ("openbaarheidsBeperking", "N", "j"),
    ("openbaar", "J", "n"),
    ("gevoelig_object", "N", "j"),
    ("bevat_persoonsgegevens", "false", "true"),
];

pub fn has_access_flags(node: &XmlNode) -> bool {
    ACCESS_FLAGS.iter().any(|(flag, _, _)| node.text_of(flag).is_some())
}

/// Public only when at least one flag is present and none restricts
pub fn access_from_flags(node: &XmlNode) -> Access {
    if !has_access_flags(node) {
        return Access::Restricted;
    }
    for (flag, absent, restricting) in ACCESS_FLAGS {
        let value = node.text_of(flag).unwrap_or(absent);
        if value.to_lowercase() == restricting {
            return Access::Restricted;
        }
    }
    Access::Public
}

pub fn copyright_from_flag(value: Option<&str>) -> Copyright {
    if value == Some("J") {
        Copyright::Yes
    } else {
        Copyright::No
    }
}

/// Legacy file URL -> relative path with a zero-padded case directory.
/// `https://host/root/SA/3/SA00000007_00001.jpg` -> `SA/00003/SA00000007_00001.jpg`
pub fn normalize_file_path(url: &str) -> Option<String> {
    let mut parts: Vec<String> = url.split('/').skip(4).map(str::to_string).collect();
    if parts.len() < 3 {
        error!(url, "unexpected file url");
        return None;
    }
    for i in [1, 2] {
        if !parts[i].is_empty() && parts[i].bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = parts[i].parse::<u64>() {
                parts[i] = format!("{:05}", n);
            }
            break;
        }
    }
    Some(parts.join("/"))
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

fn capped(value: &str, limit: usize, field: &str) -> String {
    if value.chars().count() > limit {
        warn!(field, value, limit, "value too long, truncated");
        truncate_chars(value, limit)
    } else {
        value.to_string()
    }
}

fn legacy_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"SAA_BWT_[A-Za-z0-9_-]+\.xml$").expect("valid regex"))
}

fn wabo_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/WABO/SD[A-Z]{1,2}( BWT)?/.+\.xml$|WABO_.+\.xml$").expect("valid regex")
    })
}

fn internal_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z]+)_(?:([A-Za-z]+)_)?(.*[\d-]+)").expect("valid regex"))
}

fn document_origin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(SquitXO|KEY2|Decos|BWT)").expect("valid regex"))
}

fn leading_non_digits() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\D*").expect("valid regex"))
}

// ============================================================================
// DOSSIER PARSERS
// ============================================================================

/// Archive schema of a file, from its path
pub fn detect_source(file_path: &Path) -> Option<DossierSource> {
    let path = file_path.to_string_lossy().replace('\\', "/");
    if wabo_file_pattern().is_match(&path) {
        Some(DossierSource::Wabo)
    } else if legacy_file_pattern().is_match(&path) {
        Some(DossierSource::Edepot)
    } else {
        None
    }
}

pub trait DossierParser {
    fn source(&self) -> DossierSource;

    /// Root element and its dossier element
    fn root(&self) -> (&'static str, &'static str);

    fn parse_dossier(&self, node: &XmlNode) -> Result<DossierCase>;

    /// Parse a whole document. Broken dossiers are logged and skipped;
    /// broken XML fails the document.
    fn parse_str(&self, xml: &str, file_name: &str) -> Result<Vec<DossierCase>> {
        let root = XmlNode::parse(xml)?;
        let (root_name, item_name) = self.root();
        if root.name != root_name {
            warn!(file = file_name, root = %root.name, expected = root_name, "unexpected root element");
            return Ok(Vec::new());
        }

        let mut cases = Vec::new();
        for node in root.children.iter().filter(|n| n.name == item_name) {
            match self.parse_dossier(node) {
                Ok(case) => cases.push(case),
                Err(e) => warn!(file = file_name, error = %e, "skipping dossier"),
            }
        }
        debug!(file = file_name, dossiers = cases.len(), "parsed");
        Ok(cases)
    }

    fn parse(&self, file_path: &Path) -> Result<Vec<DossierCase>> {
        let xml = std::fs::read_to_string(file_path)?;
        self.parse_str(&xml, &file_path.display().to_string())
    }
}

/// Parser for a detected source
pub fn get_parser(
    source: DossierSource,
    base_urls: &[String],
    enrichment: Arc<Enrichment>,
) -> Box<dyn DossierParser> {
    match source {
        DossierSource::Edepot => Box::new(PreWaboParser::new()),
        DossierSource::Wabo => Box::new(WaboParser::new(base_urls.to_vec(), enrichment)),
    }
}

// ============================================================================
// LEGACY (E-DEPOT) PARSER
// ============================================================================

/// `bwtDossiers/dossier`, the pre-WABO e-depot export
pub struct PreWaboParser;

impl PreWaboParser {
    pub fn new() -> Self {
        PreWaboParser
    }

    fn parse_number(node: &XmlNode, field: &str, case: &str) -> Option<i64> {
        let text = node.text_of(field)?;
        match text.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(case, field, value = text, "house number is not a number");
                None
            }
        }
    }

    fn parse_document(node: &XmlNode, subdossier_title: &str) -> DocumentRecord {
        let mut document = DocumentRecord::new(access_from_flags(node));
        document.barcode = node.text_of("barcode").map(str::to_string);
        document.subdossier_title = Some(subdossier_title.to_string());
        document.files = node
            .list_texts("bestanden", "url")
            .into_iter()
            .filter_map(normalize_file_path)
            .collect();
        document.access_restricted_until = date_from_year(node.text_of("openbaarheidsBeperkingTot"));
        document.copyright = Some(copyright_from_flag(node.text_of("auteursrechtBeperking")));
        document.copyright_until = date_from_year(node.text_of("auteursrechtBeperkingTot"));
        document.copyright_holders = node.text_of("auteursrechtHouders").map(str::to_string);
        document.copyright_manufacturers = node.text_of("auteursrechtVervaardigers").map(str::to_string);
        document
    }
}

impl Default for PreWaboParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DossierParser for PreWaboParser {
    fn source(&self) -> DossierSource {
        DossierSource::Edepot
    }

    fn root(&self) -> (&'static str, &'static str) {
        ("bwtDossiers", "dossier")
    }

    fn parse_dossier(&self, node: &XmlNode) -> Result<DossierCase> {
        let number = node
            .text_of("dossierNr")
            .ok_or_else(|| SyncError::malformed("dossier", "?", "dossierNr is missing"))?;
        let case_number = format!("{:0>5}", number);

        let district = node.text_of("stadsdeelcode").unwrap_or_else(|| {
            warn!(case = %case_number, "missing district");
            ""
        });
        let title = node.text_of("titel").unwrap_or_else(|| {
            warn!(case = %case_number, "missing title");
            ""
        });

        let mut case = DossierCase::new(&case_number, district, title, DossierSource::Edepot);
        case.date = date_from_year(node.text_of("datering"));
        case.dossier_type = node.text_of("dossierType").map(str::to_string);
        case.usage = node.text_of("gebruiksdoel").map(str::to_string);
        case.permit_number = node.text_of("bwtNummer").map(str::to_string);
        case.access = access_from_flags(node);
        case.access_restricted_until = date_from_year(node.text_of("openbaarheidsBeperkingTot"));

        for address in node.list_items("adressen", "adres") {
            case.addresses.push(Address::new(
                address.text_of("straat"),
                Self::parse_number(address, "huisnummerVan", &case_number),
                Self::parse_number(address, "huisnummerTot", &case_number),
                district,
            ));
        }

        for sub in node.list_items("subDossiers", "subDossier") {
            let sub_title = sub.text_of("titel").unwrap_or_else(|| {
                warn!(case = %case_number, "missing sub-dossier title");
                ""
            });

            // files hung directly on a sub-dossier have no access flags
            let loose = sub.list_texts("bestanden", "url");
            if !loose.is_empty() {
                warn!(case = %case_number, files = ?loose, "files on sub-dossier ignored, access unknown");
            }

            let documents: Vec<DocumentRecord> = sub
                .list_items("documenten", "document")
                .into_iter()
                .map(|d| Self::parse_document(d, sub_title))
                .collect();
            if documents.is_empty() {
                warn!(case = %case_number, "no documents in sub-dossier");
            }
            case.documents.extend(documents);
        }

        Ok(case)
    }
}

// ============================================================================
// WABO PARSER
// ============================================================================

/// `dossiers/dossier`, the WABO-era export (also carries pre-WABO and BWT
/// cases converted into the same shape)
pub struct WaboParser {
    base_urls: Vec<String>,
    enrichment: Arc<Enrichment>,
}

struct InternalNumber {
    district: String,
    prewabo: bool,
    number: String,
}

impl WaboParser {
    pub fn new(base_urls: Vec<String>, enrichment: Arc<Enrichment>) -> Self {
        WaboParser { base_urls, enrichment }
    }

    /// `sdc_33` / `sdz_prewabo_1274`
    fn split_internal_number(value: &str) -> Option<InternalNumber> {
        let caps = internal_number_pattern().captures(value)?;
        let tag = caps.get(2).map(|m| m.as_str());
        let prewabo = tag == Some("prewabo");
        let mut district = caps[1].to_string();
        if prewabo {
            // keeps these apart from e-depot cases with the same number
            district.push('p');
        }
        Some(InternalNumber {
            district,
            prewabo,
            number: caps[3].to_string(),
        })
    }

    fn title(node: &XmlNode, key: &str) -> String {
        match node.text_of("dossier_titel") {
            Some(title) if title.chars().count() > TITLE_LIMIT => {
                format!("{}...", truncate_chars(title, TITLE_LIMIT - 3))
            }
            Some(title) => title.to_string(),
            None => {
                warn!(case = key, "missing title");
                String::new()
            }
        }
    }

    fn olo_number(node: &XmlNode, default_to_zero: bool) -> Option<i64> {
        let cleaned = node
            .text_of("OLO_liaan_nummer")
            .map(|v| leading_non_digits().replace(v, "").into_owned())
            .filter(|v| !v.is_empty());
        match cleaned {
            Some(v) => match v.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(value = %v, "OLO number is not a number");
                    default_to_zero.then_some(0)
                }
            },
            None => default_to_zero.then_some(0),
        }
    }

    /// Strip the base URL, normalize the origin folder layout
    pub fn rewrite_file_url(&self, url: &str, district: &str) -> String {
        let mut path = url.to_string();
        for base in &self.base_urls {
            path = path.replace(base.as_str(), "");
        }

        if let Some(origin) = document_origin_pattern().captures(&path).map(|c| c[1].to_string()) {
            let folder = match origin.as_str() {
                "KEY2" => "Key2",
                "SquitXO" => "SquitXO",
                _ => "Decos",
            };
            let mut parts: Vec<String> = path.split('/').map(str::to_string).collect();
            if parts[0].contains("BWT") {
                parts[0] = parts[0].replace(' ', "/");
                path = parts.join("/");
            } else if parts.len() >= 2 {
                // files sit directly under the case folder
                parts.remove(parts.len() - 2);
                path = parts.join("/");
                let prefix = format!("{}/", district);
                if let Some(rest) = path.strip_prefix(&prefix) {
                    path = format!("{}/{}/{}", district, folder, rest);
                }
            }
        }

        capped(&path, FIELD_LIMIT, "file url")
    }

    /// First file name up to the first `.` and `_`
    fn barcode_from_file(file: &str) -> String {
        let name = file.rsplit('/').next().unwrap_or(file);
        let stem = name.split('.').next().unwrap_or(name);
        let barcode = stem.split('_').next().unwrap_or(stem);
        barcode.replace(' ', "%20")
    }

    fn is_passport_scan(description: &str) -> bool {
        let lower = description.to_lowercase();
        lower.contains("paspoort") && !lower.contains("kavel")
    }

    fn parse_address(&self, node: &XmlNode, id: &InternalNumber, key: &str, bwt: bool) -> Address {
        let street = node.text_of("straatnaam");
        let raw_number = node.text_of("huisnummer");
        let number = raw_number.and_then(|n| {
            let cleaned = n.replace(',', "");
            cleaned.trim().parse::<i64>().ok().or_else(|| {
                warn!(case = key, value = n, "house number is not a number");
                None
            })
        });

        let mut address = Address::new(street, number, None, &id.district);
        address.letter = node.text_of("huisletter").map(str::to_string);
        address.suffix = node.text_of("huisnummertoevoeging").map(str::to_string);
        address.locator = node
            .text_of("locatie_aanduiding")
            .map(|l| capped(l, FIELD_LIMIT, "locatie_aanduiding"));

        if let Some(bag) = node.child("bag_id") {
            let owned = |field: &str| bag.text_of(field).map(str::to_string);
            address.direct = DirectPointer {
                buildings: owned("pandidentificatie").into_iter().collect(),
                units: owned("verblijfsobjectidentificatie").into_iter().collect(),
                address_points: owned("Nummeraanduidingidentificatie").into_iter().collect(),
                place_name: owned("openbareruimteidentificatie"),
            };
        } else if bwt {
            match self
                .enrichment
                .address(key, street.unwrap_or(""), raw_number.unwrap_or(""))
            {
                Some(enriched) => address.direct = enriched.to_pointer(),
                None => warn!(case = key, "street and number not found in BWT enrichment"),
            }
        }

        address
    }

    fn parse_document(&self, node: &XmlNode, district: &str, bwt: bool) -> Option<DocumentRecord> {
        let description = node
            .text_of("document_omschrijving")
            .map(|d| capped(d, FIELD_LIMIT, "document_omschrijving"));
        if description.as_deref().is_some_and(Self::is_passport_scan) {
            return None;
        }

        let access = if bwt && !has_access_flags(node) {
            Access::Public
        } else {
            access_from_flags(node)
        };
        let mut document = DocumentRecord::new(access);
        document.description = description;
        document.subdossier_title = node.text_of("document_type").map(str::to_string);

        for file in node.list_items("bestanden", "bestand") {
            let Some(url) = file.text_of("URL") else { continue };
            document.files.push(self.rewrite_file_url(url, district));
            document.original_paths.push(
                file.text_of("oorspronkelijk_pad")
                    .map(|p| capped(p, FIELD_LIMIT, "oorspronkelijk_pad"))
                    .unwrap_or_default(),
            );
        }

        document.barcode = node
            .text_of("barcode")
            .map(str::to_string)
            .or_else(|| document.files.first().map(|f| Self::barcode_from_file(f)));

        Some(document)
    }
}

impl DossierParser for WaboParser {
    fn source(&self) -> DossierSource {
        DossierSource::Wabo
    }

    fn root(&self) -> (&'static str, &'static str) {
        ("dossiers", "dossier")
    }

    fn parse_dossier(&self, node: &XmlNode) -> Result<DossierCase> {
        let internal = node.text_of("intern_nummer").unwrap_or("");
        let id = Self::split_internal_number(internal).ok_or_else(|| {
            SyncError::malformed("dossier", internal, "intern_nummer does not match district_[tag_]number")
        })?;
        let key = format!("{}_{}", id.district, id.number);
        let district = id.district.to_uppercase();

        let origin = node.text_of("bron").map(str::to_string);
        let bwt = origin.as_deref() == Some("BWT");

        let mut case = DossierCase::new(&id.number, &district, &Self::title(node, &key), DossierSource::Wabo);
        case.wabo_origin = origin;

        if bwt {
            // BWT cases carry no date, type or access flags
            case.access = self.enrichment.access(&key);
        } else {
            case.date = node
                .text_of("begindatum")
                .and_then(|d| parse_date(d).or_else(|| date_from_year(Some(d))));
            case.dossier_type = node
                .text_of("omschrijving")
                .map(|t| truncate_chars(&t.to_lowercase(), TYPE_LIMIT));
            case.access = access_from_flags(node);
        }

        case.olo_number = Self::olo_number(node, id.prewabo || bwt);
        case.activities = node
            .list_texts("activiteiten", "activiteit")
            .into_iter()
            .map(|a| capped(a, FIELD_LIMIT, "activiteit"))
            .collect();

        for location in node.list_items("locaties", "locatie") {
            case.addresses.push(self.parse_address(location, &id, &key, bwt));
        }

        for document in node.list_items("documenten", "document") {
            if let Some(doc) = self.parse_document(document, &district, bwt) {
                case.documents.push(doc);
            }
        }
        if case.documents.is_empty() {
            warn!(case = %key, "no documents");
        }

        Ok(case)
    }
}
