//! Static travel knowledge catalog. A fixture for the tool set, not a data
//! source: entries exist so the tools have something deterministic to return.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

#[derive(Clone, Debug)]
pub struct CityEntry {
    pub name: &'static str,
    pub region: &'static str,
    pub tags: &'static [&'static str],
    pub best_season: &'static str,
    pub avg_budget_per_day: u32,
    /// (name, type, ticket price, suggested hours, description)
    pub attractions: &'static [(&'static str, &'static str, u32, u32, &'static str)],
}

pub struct TravelCatalog {
    cities: Vec<CityEntry>,
}

static CATALOG: Lazy<TravelCatalog> = Lazy::new(|| TravelCatalog {
    cities: vec![
        CityEntry {
            name: "北京",
            region: "华北",
            tags: &["历史文化", "美食", "现代都市"],
            best_season: "秋季",
            avg_budget_per_day: 400,
            attractions: &[
                ("故宫", "历史古迹", 60, 4, "明清两代皇宫，世界文化遗产"),
                ("长城", "历史古迹", 40, 5, "八达岭段，不到长城非好汉"),
                ("颐和园", "园林", 30, 3, "皇家园林博物馆"),
                ("天坛", "历史古迹", 15, 2, "明清皇帝祭天之所"),
            ],
        },
        CityEntry {
            name: "上海",
            region: "华东",
            tags: &["现代都市", "美食", "购物"],
            best_season: "春季",
            avg_budget_per_day: 500,
            attractions: &[
                ("外滩", "城市景观", 0, 2, "万国建筑博览群，夜景最佳"),
                ("豫园", "园林", 40, 2, "明代古典园林"),
                ("东方明珠", "城市景观", 160, 2, "浦东地标，观景台俯瞰全城"),
            ],
        },
        CityEntry {
            name: "成都",
            region: "西南",
            tags: &["美食", "休闲养生", "自然风光"],
            best_season: "春季",
            avg_budget_per_day: 300,
            attractions: &[
                ("大熊猫基地", "自然景观", 55, 3, "近距离观看大熊猫"),
                ("宽窄巷子", "历史街区", 0, 2, "清代古街区，小吃云集"),
                ("都江堰", "历史古迹", 80, 4, "两千年前的水利工程"),
            ],
        },
        CityEntry {
            name: "西安",
            region: "西北",
            tags: &["历史文化", "美食"],
            best_season: "秋季",
            avg_budget_per_day: 350,
            attractions: &[
                ("兵马俑", "历史古迹", 120, 3, "秦始皇陵兵马俑坑"),
                ("大雁塔", "历史古迹", 50, 2, "唐代佛教建筑"),
                ("回民街", "历史街区", 0, 2, "西安小吃集中地"),
            ],
        },
        CityEntry {
            name: "杭州",
            region: "华东",
            tags: &["自然风光", "历史文化", "休闲养生"],
            best_season: "春季",
            avg_budget_per_day: 380,
            attractions: &[
                ("西湖", "自然景观", 0, 4, "淡妆浓抹总相宜"),
                ("灵隐寺", "历史古迹", 75, 2, "千年古刹"),
                ("西溪湿地", "自然景观", 80, 3, "城市湿地公园"),
            ],
        },
        CityEntry {
            name: "三亚",
            region: "华南",
            tags: &["海滨度假", "自然风光"],
            best_season: "冬季",
            avg_budget_per_day: 600,
            attractions: &[
                ("亚龙湾", "海滨", 0, 5, "天下第一湾"),
                ("天涯海角", "海滨", 80, 3, "三亚地标景区"),
                ("蜈支洲岛", "海岛", 140, 6, "潜水与水上项目"),
            ],
        },
    ],
});

impl TravelCatalog {
    pub fn shared() -> &'static TravelCatalog {
        &CATALOG
    }

    pub fn city(&self, name: &str) -> Option<&CityEntry> {
        let name = name.trim();
        self.cities
            .iter()
            .find(|c| c.name == name || name.contains(c.name))
    }

    pub fn city_names(&self) -> Vec<String> {
        self.cities.iter().map(|c| c.name.to_string()).collect()
    }

    /// Scores cities by interest-tag overlap, budget fit, and season match.
    pub fn search(
        &self,
        interests: &[String],
        budget: Option<(u32, u32)>,
        season: Option<&str>,
    ) -> Vec<Value> {
        let mut scored: Vec<(i64, &CityEntry)> = self
            .cities
            .iter()
            .map(|city| {
                let mut score: i64 = 0;
                for interest in interests {
                    if city.tags.iter().any(|t| t.contains(interest.as_str())) {
                        score += 30;
                    }
                }
                if let Some((_, max)) = budget {
                    if city.avg_budget_per_day * 3 <= max {
                        score += 20;
                    }
                }
                if let Some(season) = season {
                    if city.best_season.contains(season) {
                        score += 15;
                    }
                }
                (score, city)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.name.cmp(b.1.name)));
        scored
            .into_iter()
            .map(|(score, city)| {
                json!({
                    "city": city.name,
                    "region": city.region,
                    "tags": city.tags,
                    "best_season": city.best_season,
                    "avg_budget_per_day": city.avg_budget_per_day,
                    "match_score": score,
                })
            })
            .collect()
    }

    pub fn city_info(&self, name: &str) -> Option<Value> {
        self.city(name).map(|city| {
            json!({
                "name": city.name,
                "region": city.region,
                "tags": city.tags,
                "best_season": city.best_season,
                "avg_budget_per_day": city.avg_budget_per_day,
                "attractions": city
                    .attractions
                    .iter()
                    .map(|(name, kind, ticket, duration, description)| json!({
                        "name": name,
                        "type": kind,
                        "ticket": ticket,
                        "duration": duration,
                        "description": description,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
    }
}
