// ==========================================
// 供应链数据导入引擎 - 模式注册表
// ==========================================
// 职责: 类别 -> 必填列/可选列/列类型/取值约束/格式规则 的静态映射
// 红线: 进程启动时定义,运行期不可变; 除查找外无行为
// ==========================================

use crate::domain::types::{Category, ColumnType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

// ==========================================
// 列约束
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ColumnConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub non_null: bool,
}

impl ColumnConstraint {
    pub fn min(min: f64) -> Self {
        Self {
            min: Some(min),
            ..Default::default()
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            non_null: false,
        }
    }

    /// 数值是否在界内
    pub fn accepts(&self, value: f64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }

    pub fn has_bounds(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

// ==========================================
// 格式规则 (如 SKU 编码)
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct FormatRule {
    pub column: String,
    pub pattern: String,
    pub description: String,
    #[serde(skip)]
    regex: Regex,
}

impl FormatRule {
    pub fn new(column: &str, pattern: &str, description: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            column: column.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

// ==========================================
// SchemaRule - 单个类别的模式定义
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct SchemaRule {
    pub category: Category,
    pub required_columns: Vec<String>, // 有序
    pub optional_columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    pub constraints: BTreeMap<String, ColumnConstraint>,
    pub formats: Vec<FormatRule>,
    pub date_column: Option<String>,        // 智能合并的日期列
    pub item_column: Option<String>,        // 智能合并的品项列
    pub measure_columns: Vec<String>,       // 取均值的度量列
    pub future_date_column: Option<String>, // 未来日期检查列
}

impl SchemaRule {
    fn new(category: Category, required: &[&str], optional: &[&str]) -> Self {
        Self {
            category,
            required_columns: required.iter().map(|s| s.to_string()).collect(),
            optional_columns: optional.iter().map(|s| s.to_string()).collect(),
            column_types: BTreeMap::new(),
            constraints: BTreeMap::new(),
            formats: Vec::new(),
            date_column: None,
            item_column: None,
            measure_columns: Vec::new(),
            future_date_column: None,
        }
    }

    fn typed(mut self, column: &str, ty: ColumnType) -> Self {
        self.column_types.insert(column.to_string(), ty);
        self
    }

    fn constrained(mut self, column: &str, c: ColumnConstraint) -> Self {
        self.constraints.insert(column.to_string(), c);
        self
    }

    fn with_format(mut self, rule: FormatRule) -> Self {
        self.formats.push(rule);
        self
    }

    /// 未声明类型的列按字符串处理
    pub fn declared_type(&self, column: &str) -> ColumnType {
        self.column_types
            .get(column)
            .copied()
            .unwrap_or(ColumnType::String)
    }

    pub fn is_required(&self, column: &str) -> bool {
        self.required_columns.iter().any(|c| c == column)
    }

    pub fn is_known(&self, column: &str) -> bool {
        self.is_required(column) || self.optional_columns.iter().any(|c| c == column)
    }

    /// 不允许为空的列: 必填列 + 带 non_null 约束的可选列（保持声明顺序）
    pub fn non_null_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.required_columns.iter().map(String::as_str).collect();
        for c in &self.optional_columns {
            if self.constraints.get(c).map_or(false, |k| k.non_null) {
                cols.push(c.as_str());
            }
        }
        cols
    }

    pub fn supports_smart_merge(&self) -> bool {
        self.date_column.is_some() && self.item_column.is_some()
    }
}

// ==========================================
// SchemaRegistry
// ==========================================
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    rules: HashMap<Category, SchemaRule>,
}

const SKU_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,63}$";
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

static BUILTIN_REGISTRY: Lazy<Result<SchemaRegistry, regex::Error>> =
    Lazy::new(SchemaRegistry::build_builtin);

impl SchemaRegistry {
    /// 内置四类模式（进程内共享,只构建一次）
    pub fn builtin() -> Result<&'static SchemaRegistry, regex::Error> {
        BUILTIN_REGISTRY.as_ref().map_err(|e| e.clone())
    }

    pub fn from_rules(rules: Vec<SchemaRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.category, r)).collect(),
        }
    }

    pub fn get(&self, category: Category) -> Option<&SchemaRule> {
        self.rules.get(&category)
    }

    fn build_builtin() -> Result<SchemaRegistry, regex::Error> {
        let non_negative = ColumnConstraint::min(0.0);

        let sales = SchemaRule::new(
            Category::Sales,
            &["date", "sku", "quantity", "revenue"],
            &["customer_name", "region", "category"],
        )
        .typed("date", ColumnType::Date)
        .typed("sku", ColumnType::String)
        .typed("quantity", ColumnType::Float)
        .typed("revenue", ColumnType::Float)
        .typed("customer_name", ColumnType::String)
        .typed("region", ColumnType::String)
        .typed("category", ColumnType::String)
        .constrained("quantity", non_negative)
        .constrained("revenue", non_negative)
        .with_format(FormatRule::new("sku", SKU_PATTERN, "SKU 仅允许字母数字、下划线、连字符")?);
        let sales = SchemaRule {
            date_column: Some("date".to_string()),
            item_column: Some("sku".to_string()),
            measure_columns: vec!["quantity".to_string(), "revenue".to_string()],
            future_date_column: Some("date".to_string()),
            ..sales
        };

        let inventory = SchemaRule::new(
            Category::Inventory,
            &["sku", "qty_on_hand", "reorder_point"],
            &["location", "unit_cost", "supplier_id"],
        )
        .typed("sku", ColumnType::String)
        .typed("qty_on_hand", ColumnType::Integer)
        .typed("reorder_point", ColumnType::Integer)
        .typed("location", ColumnType::String)
        .typed("unit_cost", ColumnType::Float)
        .typed("supplier_id", ColumnType::String)
        .constrained("qty_on_hand", non_negative)
        .constrained("reorder_point", non_negative)
        .constrained("unit_cost", non_negative)
        .with_format(FormatRule::new("sku", SKU_PATTERN, "SKU 仅允许字母数字、下划线、连字符")?);

        let supplier = SchemaRule::new(
            Category::Supplier,
            &["supplier_id", "supplier_name", "lead_time"],
            &["contact_email", "rating", "country"],
        )
        .typed("supplier_id", ColumnType::String)
        .typed("supplier_name", ColumnType::String)
        .typed("lead_time", ColumnType::Integer)
        .typed("contact_email", ColumnType::String)
        .typed("rating", ColumnType::Float)
        .typed("country", ColumnType::String)
        .constrained("lead_time", non_negative)
        .constrained("rating", ColumnConstraint::range(0.0, 5.0))
        .with_format(FormatRule::new("contact_email", EMAIL_PATTERN, "邮箱格式无效")?);

        let purchase_order = SchemaRule::new(
            Category::PurchaseOrder,
            &["po_number", "sku", "quantity"],
            &["order_date", "delivery_date", "supplier_id"],
        )
        .typed("po_number", ColumnType::String)
        .typed("sku", ColumnType::String)
        .typed("quantity", ColumnType::Float)
        .typed("order_date", ColumnType::Date)
        .typed("delivery_date", ColumnType::Date)
        .typed("supplier_id", ColumnType::String)
        .constrained("quantity", non_negative)
        .with_format(FormatRule::new("sku", SKU_PATTERN, "SKU 仅允许字母数字、下划线、连字符")?);

        Ok(Self::from_rules(vec![sales, inventory, supplier, purchase_order]))
    }
}
