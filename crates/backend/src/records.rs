//! Record projection.
//!
//! Producers send pipe-delimited records in the source schema of each
//! entity. Workers expect comma-separated rows with a column header line and
//! only the columns they use. Records too short for their schema, or missing
//! a key column, are dropped here rather than forwarded.

use gateway_core::EntityKind;

const RECORD_SEPARATOR: char = '|';

struct Schema {
  /// Number of fields a source record must carry
  width: usize,
  /// Source positions copied to the output, in output order
  columns: &'static [(usize, &'static str)],
  /// Source positions that must be non-empty
  required: &'static [usize],
}

const MOVIES: Schema = Schema {
  width: 8,
  columns: &[
    (0, "id"),
    (1, "title"),
    (2, "overview"),
    (3, "budget"),
    (4, "revenue"),
    (5, "genres"),
    (6, "production_countries"),
    (7, "release_date"),
  ],
  required: &[0, 1, 7],
};

const CREDITS: Schema = Schema {
  width: 3,
  columns: &[(0, "id"), (1, "cast")],
  required: &[0],
};

const RATINGS: Schema = Schema {
  width: 4,
  columns: &[(1, "movie_id"), (2, "rating")],
  required: &[1],
};

fn schema(entity: EntityKind) -> &'static Schema {
  match entity {
    EntityKind::Movies => &MOVIES,
    EntityKind::Credits => &CREDITS,
    EntityKind::Ratings => &RATINGS,
  }
}

/// A batch body re-rendered for the workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projected {
  /// Header line followed by one line per kept record
  pub body: String,
  pub kept: usize,
  pub dropped: usize,
}

/// Column names of the projected rows for an entity
pub fn columns(entity: EntityKind) -> Vec<&'static str> {
  schema(entity).columns.iter().map(|(_, name)| *name).collect()
}

/// Project source records into worker rows.
pub fn project<'a>(entity: EntityKind, records: impl IntoIterator<Item = &'a str>) -> Projected {
  let schema = schema(entity);

  let mut body = String::new();
  push_row(&mut body, schema.columns.iter().map(|(_, name)| *name));

  let mut kept = 0;
  let mut dropped = 0;

  for record in records {
    let fields: Vec<&str> = record.split(RECORD_SEPARATOR).map(str::trim).collect();
    let complete = fields.len() >= schema.width && schema.required.iter().all(|&i| !fields[i].is_empty());
    if !complete {
      dropped += 1;
      continue;
    }

    body.push('\n');
    push_row(&mut body, schema.columns.iter().map(|(i, _)| fields[*i]));
    kept += 1;
  }

  Projected { body, kept, dropped }
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
  for (i, field) in fields.enumerate() {
    if i > 0 {
      out.push(',');
    }
    push_field(out, field);
  }
}

// RFC 4180: quote fields containing separators, quotes or line breaks
fn push_field(out: &mut String, field: &str) {
  if field.contains([',', '"', '\n', '\r']) {
    out.push('"');
    out.push_str(&field.replace('"', "\"\""));
    out.push('"');
  } else {
    out.push_str(field);
  }
}
