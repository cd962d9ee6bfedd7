//! Prompt templates for the chat-model oracles.

use crate::oracle::chat::ChatMessage;

const SCORER_SYSTEM: &str = "\
You analyse telecom microwave-link data. You compare one raw measurement entry \
against several metadata entries and judge how likely each metadata entry \
describes the same physical link.

Rules:
1. Never use link numbers for the comparison.
2. Never use coordinates (ITMX, ITMY, latitude, longitude) for the comparison.
3. Compare technical parameters only: frequency, polarization, bandwidth, \
power levels, antenna characteristics, equipment types and configuration.
4. Prefer physical characteristics that stay stable across records of the same link.";

const SCORER_HUMAN: &str = "\
Raw data entry:
{raw}

Metadata entries (array, indexed from 0):
{candidates}

For every metadata entry return an object with:
- \"correlation\": number between 0 and 1
- \"explanation\": short reasoning for the score
- \"metadata_index\": index of the entry in the array above
- \"matching_points\": array of strings naming the matching parameters

Answer with a JSON array only.";

const MAPPER_SYSTEM: &str = "\
You map column names between two tabular schemas. Column names may be in \
English or Hebrew and may carry units (KM, GHz, meters).

Consider semantic meaning across languages, the kind of data a column holds, \
name similarity and units. Typical targets: frequency or band -> Frequency_GHz, \
polarization -> Polarization, distance or length -> Length_km, antenna \
diameters -> NearAntennaDiameter_m / FarAntennaDiameter_m.

Do not map link numbers, coordinates, RxLevel or TxLevel; those come from raw data. \
Only include mappings you are confident about.";

const MAPPER_HUMAN: &str = "\
Source columns (matched metadata):
{source}

Target columns (canonical schema):
{target}

Answer with a JSON object only: {\"mappings\": {source column: target column}, \
\"explanations\": {source column: reason}}.";

pub fn scorer_messages(raw: &serde_json::Value, candidates: &serde_json::Value) -> Vec<ChatMessage> {
    let human = SCORER_HUMAN
        .replace("{raw}", &raw.to_string())
        .replace("{candidates}", &candidates.to_string());
    vec![ChatMessage::system(SCORER_SYSTEM), ChatMessage::user(human)]
}

pub fn mapper_messages(source_columns: &[String], target_columns: &[String]) -> Vec<ChatMessage> {
    let human = MAPPER_HUMAN
        .replace("{source}", &bullet_list(source_columns))
        .replace("{target}", &bullet_list(target_columns));
    vec![ChatMessage::system(MAPPER_SYSTEM), ChatMessage::user(human)]
}

fn bullet_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("- {column}"))
        .collect::<Vec<_>>()
        .join("\n")
}
