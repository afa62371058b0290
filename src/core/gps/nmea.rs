//! NMEA 0183 sentence parser for GPS position fixes
//!
//! Parses the subset of sentences a survey fix can come from:
//! - RMC: Recommended Minimum Navigation Information
//! - GGA: Global Positioning System Fix Data
//! - GLL: Geographic Position - Latitude/Longitude
//! - GNS: GNSS Fix Data (multi-constellation)
//!
//! Other sentence types are recognized but carry no position for us.

/// GPS fix quality from GGA field 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixQuality {
    #[default]
    Invalid = 0,
    GpsFix = 1,
    DgpsFix = 2,
    PpsFix = 3,
    Rtk = 4,
    FloatRtk = 5,
    Estimated = 6,
    Manual = 7,
    Simulation = 8,
}

impl From<u8> for FixQuality {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::GpsFix,
            2 => Self::DgpsFix,
            3 => Self::PpsFix,
            4 => Self::Rtk,
            5 => Self::FloatRtk,
            6 => Self::Estimated,
            7 => Self::Manual,
            8 => Self::Simulation,
            _ => Self::Invalid,
        }
    }
}

/// Geographic coordinate parsed from the NMEA `DDDMM.MMMM` format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coordinate {
    pub degrees: f64,
    /// N/S for latitude, E/W for longitude.
    pub direction: char,
}

impl Coordinate {
    /// Parse an NMEA coordinate field pair (`4807.038`, `N`).
    pub fn parse(value: &str, direction: &str) -> Option<Self> {
        if value.is_empty() || direction.is_empty() {
            return None;
        }
        let value: f64 = value.parse().ok()?;
        let dir = direction.chars().next()?;

        let degrees = (value / 100.0).floor();
        let minutes = value - degrees * 100.0;
        Some(Self {
            degrees: degrees + minutes / 60.0,
            direction: dir,
        })
    }

    /// Signed decimal degrees (south and west negative).
    pub fn to_decimal(self) -> f64 {
        match self.direction {
            'S' | 'W' => -self.degrees,
            _ => self.degrees,
        }
    }
}

/// Parsed RMC sentence.
#[derive(Debug, Clone, Default)]
pub struct RmcData {
    /// A = active, V = void.
    pub status: char,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
}

/// Parsed GGA sentence.
#[derive(Debug, Clone, Default)]
pub struct GgaData {
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub fix_quality: FixQuality,
}

/// Parsed GLL sentence.
#[derive(Debug, Clone, Default)]
pub struct GllData {
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub status: char,
}

/// Parsed GNS sentence.
#[derive(Debug, Clone, Default)]
pub struct GnsData {
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
}

/// A recognized NMEA sentence.
#[derive(Debug, Clone)]
pub enum NmeaSentence {
    Rmc(RmcData),
    Gga(GgaData),
    Gll(GllData),
    Gns(GnsData),
    Unknown(String),
}

impl NmeaSentence {
    /// Position fix carried by this sentence, when valid.
    ///
    /// RMC/GLL require validity `A`; GGA requires a non-invalid fix quality;
    /// GNS requires non-zero coordinates. All-zero coordinates are rejected
    /// (receivers emit 0,0 before the first fix).
    pub fn valid_fix(&self) -> Option<(f64, f64)> {
        let (lat, lon, good) = match self {
            Self::Rmc(d) => (d.latitude, d.longitude, d.status == 'A'),
            Self::Gga(d) => (d.latitude, d.longitude, d.fix_quality != FixQuality::Invalid),
            Self::Gll(d) => (d.latitude, d.longitude, d.status == 'A'),
            Self::Gns(d) => (d.latitude, d.longitude, true),
            Self::Unknown(_) => return None,
        };
        if !good {
            return None;
        }
        let (lat, lon) = (lat?.to_decimal(), lon?.to_decimal());
        if lat == 0.0 && lon == 0.0 {
            return None;
        }
        Some((lat, lon))
    }
}

/// NMEA parse errors.
#[derive(Debug, Clone)]
pub enum NmeaError {
    InvalidFormat,
    ChecksumMismatch { expected: u8, got: u8 },
}

/// Calculate the XOR checksum of the sentence body.
pub fn calculate_checksum(data: &str) -> u8 {
    data.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn verify_checksum(sentence: &str) -> Result<(), NmeaError> {
    if !sentence.starts_with('$') && !sentence.starts_with('!') {
        return Err(NmeaError::InvalidFormat);
    }
    if let Some(star) = sentence.rfind('*') {
        let data = &sentence[1..star];
        let expected = u8::from_str_radix(sentence[star + 1..].trim(), 16)
            .map_err(|_| NmeaError::InvalidFormat)?;
        let got = calculate_checksum(data);
        if got != expected {
            return Err(NmeaError::ChecksumMismatch { expected, got });
        }
    }
    Ok(())
}

/// Parse a single NMEA sentence, verifying the checksum when present.
pub fn parse(sentence: &str) -> Result<NmeaSentence, NmeaError> {
    let sentence = sentence.trim();
    verify_checksum(sentence)?;

    let data = match sentence.rfind('*') {
        Some(star) => &sentence[1..star],
        None => &sentence[1..],
    };
    let fields: Vec<&str> = data.split(',').collect();
    if fields.is_empty() || fields[0].is_empty() {
        return Err(NmeaError::InvalidFormat);
    }

    // Strip the two-character talker prefix (GP, GN, GL, GA, ...).
    let kind = fields[0].to_uppercase();
    let kind = if kind.len() > 3 { &kind[2..] } else { kind.as_str() };

    let parsed = match kind {
        "RMC" => NmeaSentence::Rmc(parse_rmc(&fields)),
        "GGA" => NmeaSentence::Gga(parse_gga(&fields)),
        "GLL" => NmeaSentence::Gll(parse_gll(&fields)),
        "GNS" => NmeaSentence::Gns(parse_gns(&fields)),
        other => NmeaSentence::Unknown(other.to_string()),
    };
    Ok(parsed)
}

fn field<'a>(fields: &'a [&str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or("")
}

fn parse_rmc(fields: &[&str]) -> RmcData {
    RmcData {
        status: field(fields, 2).chars().next().unwrap_or('V'),
        latitude: Coordinate::parse(field(fields, 3), field(fields, 4)),
        longitude: Coordinate::parse(field(fields, 5), field(fields, 6)),
    }
}

fn parse_gga(fields: &[&str]) -> GgaData {
    GgaData {
        latitude: Coordinate::parse(field(fields, 2), field(fields, 3)),
        longitude: Coordinate::parse(field(fields, 4), field(fields, 5)),
        fix_quality: field(fields, 6).parse::<u8>().unwrap_or(0).into(),
    }
}

fn parse_gll(fields: &[&str]) -> GllData {
    GllData {
        latitude: Coordinate::parse(field(fields, 1), field(fields, 2)),
        longitude: Coordinate::parse(field(fields, 3), field(fields, 4)),
        status: field(fields, 6).chars().next().unwrap_or('V'),
    }
}

fn parse_gns(fields: &[&str]) -> GnsData {
    GnsData {
        latitude: Coordinate::parse(field(fields, 2), field(fields, 3)),
        longitude: Coordinate::parse(field(fields, 4), field(fields, 5)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmc_active_fix() {
        let s = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let parsed = parse(s).unwrap();
        let (lat, lon) = parsed.valid_fix().unwrap();
        assert!((lat - 48.1173).abs() < 0.001);
        assert!((lon - 11.5166).abs() < 0.001);
    }

    #[test]
    fn rmc_void_has_no_fix() {
        let s = "$GPRMC,123519,V,4807.038,N,01131.000,E,,,230394,,";
        assert!(parse(s).unwrap().valid_fix().is_none());
    }

    #[test]
    fn gga_fix_quality_gates() {
        let good = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,47.0,M,,*47";
        assert!(parse(good).unwrap().valid_fix().is_some());

        let invalid = "$GPGGA,123519,4807.038,N,01131.000,E,0,00,,,M,,M,,";
        assert!(parse(invalid).unwrap().valid_fix().is_none());
    }

    #[test]
    fn gll_south_west_signs() {
        let s = "$GPGLL,3751.65,S,14507.36,E,225444,A,*1D";
        let (lat, lon) = parse(s).unwrap().valid_fix().unwrap();
        assert!(lat < 0.0);
        assert!(lon > 0.0);
    }

    #[test]
    fn zero_coordinates_rejected() {
        let s = "$GNGNS,123519,0000.000,N,00000.000,E,AA,10,1.0,100.0,,,";
        assert!(parse(s).unwrap().valid_fix().is_none());
    }

    #[test]
    fn checksum_mismatch_detected() {
        let s = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00";
        assert!(matches!(
            parse(s),
            Err(NmeaError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn checksum_value() {
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,47.0,M,,";
        assert_eq!(calculate_checksum(body), 0x47);
    }

    #[test]
    fn unknown_talker_tolerated() {
        let s = "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74";
        assert!(matches!(parse(s), Ok(NmeaSentence::Unknown(_))));
    }
}
