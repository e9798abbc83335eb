//! Final-answer shaping: recognising the structured JSON answer an LLM may
//! have produced earlier in the run, rendering it as Markdown, and splitting
//! prepared text into small streaming chunks.

use serde_json::Value;

/// `{opening, cities:[{name, emoji, days, budget, season, attractions}], tips}`.
#[derive(Clone, Debug, Default)]
pub struct StructuredAnswer {
    pub opening: String,
    pub cities: Vec<StructuredCity>,
    pub tips: String,
}

#[derive(Clone, Debug, Default)]
pub struct StructuredCity {
    pub name: String,
    pub emoji: String,
    pub days: String,
    pub budget: String,
    pub season: String,
    pub attractions: Vec<StructuredAttraction>,
}

#[derive(Clone, Debug, Default)]
pub struct StructuredAttraction {
    pub name: String,
    pub kind: String,
    pub ticket: String,
    pub description: String,
}

fn field_str(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Accepts the shape when `cities` is a non-empty array of named objects.
pub fn parse_structured_answer(value: &Value) -> Option<StructuredAnswer> {
    let cities = value.get("cities")?.as_array()?;
    if cities.is_empty() {
        return None;
    }
    let parsed: Vec<StructuredCity> = cities
        .iter()
        .filter_map(|city| {
            let name = field_str(city, "name");
            if name.is_empty() {
                return None;
            }
            Some(StructuredCity {
                name,
                emoji: field_str(city, "emoji"),
                days: field_str(city, "days"),
                budget: field_str(city, "budget"),
                season: field_str(city, "season"),
                attractions: city
                    .get("attractions")
                    .and_then(Value::as_array)
                    .map(|attrs| {
                        attrs
                            .iter()
                            .map(|a| StructuredAttraction {
                                name: field_str(a, "name"),
                                kind: field_str(a, "type"),
                                ticket: field_str(a, "ticket"),
                                description: field_str(a, "description"),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect();
    if parsed.is_empty() {
        return None;
    }
    Some(StructuredAnswer {
        opening: field_str(value, "opening"),
        cities: parsed,
        tips: field_str(value, "tips"),
    })
}

/// Renders the structured answer as the canonical Markdown layout.
pub fn render_markdown(answer: &StructuredAnswer) -> String {
    let mut lines: Vec<String> = Vec::new();

    if !answer.opening.is_empty() {
        lines.push(answer.opening.clone());
        lines.push(String::new());
    }

    for (i, city) in answer.cities.iter().enumerate() {
        lines.push(format!("## {} {}", city.emoji, city.name).trim().to_string());
        lines.push(String::new());
        lines.push(format!(
            "- **推荐天数**：{}",
            if city.days.is_empty() { "3天" } else { &city.days }
        ));
        lines.push(format!(
            "- **预算**：约 **{}/天**",
            if city.budget.is_empty() { "待定" } else { &city.budget }
        ));
        lines.push(format!(
            "- **最佳旅行季节**：{}",
            if city.season.is_empty() { "四季皆宜" } else { &city.season }
        ));
        lines.push(String::new());

        lines.push("#### 必游景点：".to_string());
        for (j, attr) in city.attractions.iter().enumerate() {
            let free = attr.ticket.is_empty() || attr.ticket == "0" || attr.ticket == "免费";
            let ticket = if free {
                "完全免费".to_string()
            } else {
                format!("门票 **{}**", attr.ticket)
            };
            let kind = if attr.kind.is_empty() { "景点" } else { &attr.kind };
            lines.push(format!("{}. **{}**（{}）- {}", j + 1, attr.name, kind, ticket));
            if !attr.description.is_empty() {
                lines.push(format!("   - {}", attr.description));
            }
            lines.push(String::new());
        }

        if i + 1 < answer.cities.len() {
            lines.push(String::new());
        }
    }

    if !answer.tips.is_empty() {
        lines.push(String::new());
        lines.push("☀️ 旅行小贴士".to_string());
        lines.push(String::new());
        lines.push(answer.tips.clone());
    }

    lines.join("\n")
}

const HARD_BREAKS: &str = "。！？；：、\n";
const SOFT_BREAKS: &str = ".!?:;,";
const MAX_CHUNK: usize = 20;
const RESPLIT_OVER: usize = 15;
const RESPLIT_SIZE: usize = 8;

/// Splits prepared answer text into small chunks at punctuation boundaries,
/// for the non-token-stream path. Over-long chunks are re-split.
pub fn split_into_chunks(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let mut end = (i + MAX_CHUNK).min(chars.len());
        for j in ((i + 1)..=end).rev() {
            let ch = chars[j - 1];
            if HARD_BREAKS.contains(ch) {
                end = j;
                break;
            }
            if SOFT_BREAKS.contains(ch) && j > i + 3 {
                end = j;
                break;
            }
        }
        if end <= i {
            end = (i + 1).min(chars.len());
        }
        chunks.push(chars[i..end].iter().collect());
        i = end;
    }

    let mut output = Vec::new();
    for chunk in chunks {
        let chunk_chars: Vec<char> = chunk.chars().collect();
        if chunk_chars.len() > RESPLIT_OVER {
            for piece in chunk_chars.chunks(RESPLIT_SIZE) {
                output.push(piece.iter().collect());
            }
        } else {
            output.push(chunk);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "opening": "哇塞，小伙伴！",
            "cities": [{
                "name": "北京",
                "emoji": "🏯",
                "days": "3天",
                "budget": "400元",
                "season": "秋季",
                "attractions": [
                    {"name": "故宫", "type": "历史古迹", "ticket": "60", "description": "明清皇宫"},
                    {"name": "外滩夜景", "type": "城市景观", "ticket": "免费", "description": ""}
                ]
            }],
            "tips": "带好证件"
        })
    }

    #[test]
    fn parses_full_shape() {
        let answer = parse_structured_answer(&sample()).unwrap();
        assert_eq!(answer.cities.len(), 1);
        assert_eq!(answer.cities[0].attractions[0].name, "故宫");
        assert_eq!(answer.tips, "带好证件");
    }

    #[test]
    fn rejects_missing_or_empty_cities() {
        assert!(parse_structured_answer(&json!({"opening": "hi"})).is_none());
        assert!(parse_structured_answer(&json!({"cities": []})).is_none());
        assert!(parse_structured_answer(&json!({"cities": [{"emoji": "x"}]})).is_none());
    }

    #[test]
    fn markdown_includes_sections() {
        let answer = parse_structured_answer(&sample()).unwrap();
        let md = render_markdown(&answer);
        assert!(md.contains("## 🏯 北京"));
        assert!(md.contains("- **推荐天数**：3天"));
        assert!(md.contains("1. **故宫**（历史古迹）- 门票 **60**"));
        assert!(md.contains("完全免费"));
        assert!(md.contains("☀️ 旅行小贴士"));
    }

    #[test]
    fn chunks_reassemble_exactly() {
        let text = "北京是一座古都。故宫、长城都值得一去！预算大约每天400元，秋季最佳。";
        let chunks = split_into_chunks(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= RESPLIT_OVER));
    }

    #[test]
    fn chunking_handles_unbroken_text() {
        let text = "a".repeat(50);
        let chunks = split_into_chunks(&text);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_chunks("").is_empty());
    }
}
