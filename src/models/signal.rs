use serde::{Deserialize, Serialize};

/// 综合评分：分值 + 按计算顺序排列的贡献因子标签（供前端解释）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositeScore {
    pub value: u32,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PivotTrigger {
    /// 跳空高开 + 大涨
    Gap,
    /// 单日大涨
    Power,
}

/// 情绪拐点（Episodic Pivot）信号
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicPivot {
    pub ticker: String,
    pub company: String,
    pub trigger: PivotTrigger,
    pub change_pct: f64,
    pub gap_pct: Option<f64>,
    pub rel_volume: f64,
    pub high_52w_pct: Option<f64>,
    pub rsi: Option<f64>,
    pub quality: u32,
    pub near_earnings: bool,
}

/// 主题轮动强度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThemeRotation {
    pub theme: String,
    pub members: usize,
    pub avg_change_pct: f64,
    pub breadth_pct: f64,
    pub avg_rel_volume: f64,
    pub baseline_breadth_pct: Option<f64>,
    pub score: u32,
}
