//! The travel tool set: catalog-backed lookups plus LLM-backed generators.
//!
//! Catalog tools are blocking closures (pure in-memory lookups); LLM tools
//! are future-returning closures that capture the session's chat client.

use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{CityEntry, ToolExecutor, ToolInfo, ToolRegistry, TravelCatalog};
use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::react::extract_json_object;

fn str_param(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(String::from)
}

fn u32_param(params: &Map<String, Value>, key: &str) -> Option<u32> {
    params.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn string_list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// `cities` may be a list or a scalar after alias mapping; the first entry
/// stands in where a single city is needed.
fn first_city(params: &Map<String, Value>) -> Option<String> {
    let cities = string_list(params, "cities");
    if let Some(first) = cities.first() {
        return Some(first.clone());
    }
    str_param(params, "city")
}

fn search_cities(catalog: &TravelCatalog, params: &Map<String, Value>) -> Value {
    let interests = string_list(params, "interests");
    let budget = match (u32_param(params, "budget_min"), u32_param(params, "budget_max")) {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    };
    let season = str_param(params, "season");
    let cities = catalog.search(&interests, budget, season.as_deref());
    json!({"success": true, "cities": cities})
}

fn query_attractions(catalog: &TravelCatalog, params: &Map<String, Value>) -> Value {
    let names = string_list(params, "cities");
    let mut found = Map::new();
    for name in &names {
        if let Some(info) = catalog.city_info(name) {
            found.insert(
                info["name"].as_str().unwrap_or(name).to_string(),
                json!({
                    "region": info["region"],
                    "attractions": info["attractions"],
                }),
            );
        }
    }
    if found.is_empty() {
        json!({"success": false, "error": format!("未找到城市: {}", names.join(", "))})
    } else {
        json!({"success": true, "cities": found})
    }
}

fn get_city_info(catalog: &TravelCatalog, params: &Map<String, Value>) -> Value {
    match first_city(params).and_then(|name| catalog.city_info(&name)) {
        Some(info) => json!({"success": true, "info": info}),
        None => json!({
            "success": false,
            "error": format!("未找到城市: {}", first_city(params).unwrap_or_default()),
        }),
    }
}

fn generate_route(catalog: &TravelCatalog, params: &Map<String, Value>) -> Value {
    let Some(city_name) = first_city(params) else {
        return json!({"success": false, "error": "缺少城市"});
    };
    let days = u32_param(params, "days").unwrap_or(3).max(1);
    let Some(city) = catalog.city(&city_name) else {
        return json!({"success": false, "error": format!("未找到城市: {city_name}")});
    };

    let mut route_plan = Vec::new();
    let mut tickets = 0u32;
    for day in 0..days {
        match city.attractions.get(day as usize) {
            Some((name, _, ticket, hours, _)) => {
                tickets += ticket;
                route_plan.push(json!({
                    "day": day + 1,
                    "attractions": [name],
                    "schedule": format!("游览{name}（约{hours}小时）"),
                }));
            }
            None => route_plan.push(json!({
                "day": day + 1,
                "attractions": ["自由活动"],
                "schedule": "自由活动",
            })),
        }
    }

    json!({
        "success": true,
        "city": city.name,
        "route_plan": route_plan,
        "total_cost_estimate": {
            "tickets": tickets,
            "total": tickets + city.avg_budget_per_day * days,
        },
    })
}

fn calculate_budget(catalog: &TravelCatalog, params: &Map<String, Value>) -> Value {
    let Some(city_name) = first_city(params) else {
        return json!({"success": false, "error": "缺少城市"});
    };
    let days = u32_param(params, "days").unwrap_or(3).max(1);
    let Some(city) = catalog.city(&city_name) else {
        return json!({"success": false, "error": format!("未找到城市: {city_name}")});
    };
    let tickets: u32 = city
        .attractions
        .iter()
        .take(days as usize)
        .map(|(_, _, ticket, _, _)| ticket)
        .sum();
    let living = city.avg_budget_per_day * days;
    json!({
        "success": true,
        "city": city.name,
        "days": days,
        "budget": {
            "tickets": tickets,
            "living": living,
            "total": tickets + living,
        },
    })
}

fn attractions_brief(city: &CityEntry) -> String {
    city.attractions
        .iter()
        .map(|(name, kind, ticket, hours, _)| {
            format!("- {name}：{kind}，建议游玩{hours}小时，门票{ticket}元")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn llm_chat(
    llm: Arc<dyn LlmClient>,
    params: Map<String, Value>,
) -> Result<Value, AgentError> {
    let query = str_param(&params, "query").unwrap_or_default();
    let context = str_param(&params, "context").unwrap_or_default();
    let mut messages = Vec::new();
    if !context.is_empty() {
        messages.push(ChatMessage::system(context));
    }
    messages.push(ChatMessage::user(query));

    match llm.chat(&messages, ChatOptions::default()).await {
        Ok(resp) => Ok(json!({"success": true, "response": resp.content})),
        Err(e) => Ok(json!({"success": false, "response": e.to_string()})),
    }
}

async fn generate_city_recommendation(
    llm: Arc<dyn LlmClient>,
    params: Map<String, Value>,
) -> Result<Value, AgentError> {
    let user_query = str_param(&params, "user_query").unwrap_or_default();
    let available = string_list(&params, "available_cities");
    let system = format!(
        "你是一个专业的旅游助手，负责根据用户需求推荐合适的旅游城市。\n\n\
         可推荐城市列表：{}\n\n\
         请从列表中选择3-5个最合适的城市，以JSON格式返回：\n\
         {{\"recommendations\": [{{\"city\": \"城市名\", \"reason\": \"推荐理由\", \"match_score\": 90}}], \"explanation\": \"整体说明\"}}\n\
         只推荐列表中存在的城市，按匹配度从高到低排序。",
        available.join(", ")
    );
    let resp = llm
        .chat(
            &[ChatMessage::system(system), ChatMessage::user(user_query)],
            ChatOptions::temperature(0.7),
        )
        .await?;
    match extract_json_object(&resp.content) {
        Some(parsed) => Ok(json!({"success": true, "recommendations": parsed})),
        None => Ok(json!({"success": true, "response": resp.content})),
    }
}

async fn generate_route_plan(
    catalog: &'static TravelCatalog,
    llm: Arc<dyn LlmClient>,
    params: Map<String, Value>,
) -> Result<Value, AgentError> {
    let Some(city_name) = first_city(&params) else {
        return Ok(json!({"success": false, "error": "缺少城市"}));
    };
    let days = u32_param(&params, "days").unwrap_or(3).max(1);
    let preferences = str_param(&params, "preferences").unwrap_or_default();
    let Some(city) = catalog.city(&city_name) else {
        return Ok(json!({"success": false, "error": format!("未找到城市: {city_name}")}));
    };

    let system = format!(
        "你是一个专业的旅游规划师。\n目标城市：{}\n旅行天数：{}天\n可选景点：\n{}\n\n用户偏好：{}\n\n\
         请制定{}天的详细路线，以JSON格式返回：\n\
         {{\"route_plan\": [{{\"day\": 1, \"attractions\": [\"景点\"], \"schedule\": \"安排\", \"tips\": \"建议\"}}],\n\
          \"total_cost_estimate\": {{\"tickets\": 0, \"meals\": 0, \"transportation\": 0, \"total\": 0}},\n\
          \"travel_tips\": [\"tip\"]}}",
        city.name,
        days,
        attractions_brief(city),
        preferences,
        days,
    );
    let user = format!("帮我规划{}{}天的旅游路线", city.name, days);
    let resp = llm
        .chat(
            &[ChatMessage::system(system), ChatMessage::user(user)],
            ChatOptions::temperature(0.6),
        )
        .await?;
    match extract_json_object(&resp.content) {
        Some(Value::Object(mut plan)) => {
            plan.insert("success".into(), json!(true));
            plan.insert("city".into(), json!(city.name));
            Ok(Value::Object(plan))
        }
        _ => {
            // Malformed plan JSON falls back to the deterministic route.
            let mut params = params;
            params.insert("city".into(), json!(city.name));
            Ok(generate_route(catalog, &params))
        }
    }
}

/// Builds the full travel registry against a catalog and a chat client.
pub fn build_travel_registry(
    catalog: &'static TravelCatalog,
    llm: Arc<dyn LlmClient>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolInfo::new(
            "search_cities",
            "根据用户兴趣、预算和季节偏好搜索匹配的城市",
            json!({
                "type": "object",
                "properties": {
                    "interests": {"type": "array", "items": {"type": "string"}, "description": "用户兴趣标签列表"},
                    "budget_min": {"type": "integer", "description": "最低预算"},
                    "budget_max": {"type": "integer", "description": "最高预算"},
                    "season": {"type": "string", "description": "旅行季节"}
                }
            }),
        )
        .category("travel")
        .tags(&["search", "city", "recommend"]),
        ToolExecutor::sync(move |p| Ok(search_cities(catalog, &p))),
    );

    registry.register(
        ToolInfo::new(
            "query_attractions",
            "查询指定城市的景点信息",
            json!({
                "type": "object",
                "properties": {
                    "cities": {"type": "array", "items": {"type": "string"}, "description": "要查询的城市名称列表"}
                },
                "required": ["cities"]
            }),
        )
        .required(&["cities"])
        .category("travel")
        .tags(&["query", "attraction", "scenic"]),
        ToolExecutor::sync(move |p| Ok(query_attractions(catalog, &p))),
    );

    registry.register(
        ToolInfo::new(
            "get_city_info",
            "获取指定城市的详细信息",
            json!({
                "type": "object",
                "properties": {"city": {"type": "string", "description": "城市名称"}},
                "required": ["city"]
            }),
        )
        .category("travel")
        .tags(&["city", "info", "detail"]),
        ToolExecutor::sync(move |p| Ok(get_city_info(catalog, &p))),
    );

    registry.register(
        ToolInfo::new(
            "generate_route",
            "为指定城市生成详细的旅游路线规划",
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "目标城市名称"},
                    "days": {"type": "integer", "description": "旅行天数，默认3天", "default": 3}
                },
            }),
        )
        .category("travel")
        .tags(&["route", "plan", "schedule"]),
        ToolExecutor::sync(move |p| Ok(generate_route(catalog, &p))),
    );

    registry.register(
        ToolInfo::new(
            "calculate_budget",
            "计算指定城市和天数的旅游预算",
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "目标城市"},
                    "days": {"type": "integer", "description": "旅行天数"}
                },
                "required": ["city", "days"]
            }),
        )
        .required(&["days"])
        .category("travel")
        .tags(&["budget", "cost", "expense"]),
        ToolExecutor::sync(move |p| Ok(calculate_budget(catalog, &p))),
    );

    let chat_llm = Arc::clone(&llm);
    registry.register(
        ToolInfo::new(
            "llm_chat",
            "使用大语言模型进行对话回答",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "用户问题"},
                    "context": {"type": "string", "description": "对话上下文"}
                },
                "required": ["query"]
            }),
        )
        .required(&["query"])
        .category("ai")
        .tags(&["chat", "llm", "ai"]),
        ToolExecutor::asynchronous(move |p| llm_chat(Arc::clone(&chat_llm), p).boxed()),
    );

    let rec_llm = Arc::clone(&llm);
    registry.register(
        ToolInfo::new(
            "generate_city_recommendation",
            "根据用户需求生成个性化城市推荐",
            json!({
                "type": "object",
                "properties": {
                    "user_query": {"type": "string", "description": "用户原始需求"},
                    "available_cities": {"type": "array", "items": {"type": "string"}, "description": "可选城市列表"}
                },
                "required": ["user_query", "available_cities"]
            }),
        )
        .required(&["user_query", "available_cities"])
        .category("ai")
        .tags(&["recommend", "city", "llm"]),
        ToolExecutor::asynchronous(move |p| {
            generate_city_recommendation(Arc::clone(&rec_llm), p).boxed()
        }),
    );

    let plan_llm = llm;
    registry.register(
        ToolInfo::new(
            "generate_route_plan",
            "根据城市景点信息生成详细路线规划",
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "目标城市"},
                    "days": {"type": "integer", "description": "旅行天数"},
                    "preferences": {"type": "string", "description": "用户偏好"}
                },
                "required": ["city", "days"]
            }),
        )
        .required(&["days"])
        .category("ai")
        .tags(&["route", "plan", "llm"]),
        ToolExecutor::asynchronous(move |p| {
            generate_route_plan(catalog, Arc::clone(&plan_llm), p).boxed()
        }),
    );

    registry
}
