use csv::WriterBuilder;

use super::QueryError;
use crate::sample::Sample;

const CSV_HEADER: [&str; 7] = [
    "captured_at_unix",
    "captured_at",
    "day",
    "latitude",
    "longitude",
    "altitude",
    "velocity",
];

/// Render samples in the given order. Absent optionals become empty cells.
pub fn render_csv(samples: &[Sample]) -> Result<String, QueryError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER).map_err(encode_error)?;
    for sample in samples {
        writer.serialize(sample).map_err(encode_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| QueryError::Encode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| QueryError::Encode(e.to_string()))
}

fn encode_error(err: csv::Error) -> QueryError {
    QueryError::Encode(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::sample_at;

    #[test]
    fn header_only_for_no_samples() {
        let text = render_csv(&[]).unwrap();
        assert_eq!(
            text,
            "captured_at_unix,captured_at,day,latitude,longitude,altitude,velocity\n"
        );
    }

    #[test]
    fn parses_back_to_the_same_samples() {
        let mut partial = sample_at(90_061, -51.25);
        partial.altitude = None;
        partial.velocity = None;
        let samples = vec![sample_at(1_000, 12.5), partial];

        let text = render_csv(&samples).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        assert_eq!(headers, CSV_HEADER);

        let parsed: Vec<Sample> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed, samples);
    }

    #[test]
    fn absent_fields_are_empty_cells() {
        let mut sample = sample_at(0, 1.0);
        sample.altitude = None;
        sample.velocity = None;

        let text = render_csv(&[sample]).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.ends_with(",,"), "row was {row}");
        assert!(row.starts_with("0,1970-01-01 00:00:00,1970-01-01,"));
    }
}
