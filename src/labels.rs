// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 类别显示名映射 (模型原生类别名 → 界面显示名)
//!
//! 纯数据: 内置表 + JSON 覆盖表,查不到时原样返回

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use phf::phf_map;

/// 内置犬种/猫种显示名
static BUILTIN: phf::Map<&'static str, &'static str> = phf_map! {
    "dog" => "狗",
    "cat" => "猫",
    "person" => "人",
    "chihuahua" => "吉娃娃",
    "japanese_spaniel" => "日本狆",
    "maltese_dog" => "马尔济斯犬",
    "pekinese" => "京巴犬",
    "shih-tzu" => "西施犬",
    "shih_tzu" => "西施犬",
    "papillon" => "蝴蝶犬",
    "beagle" => "比格犬",
    "bloodhound" => "寻血猎犬",
    "whippet" => "惠比特犬",
    "weimaraner" => "威玛猎犬",
    "yorkshire_terrier" => "约克夏梗",
    "golden_retriever" => "金毛寻回犬",
    "labrador_retriever" => "拉布拉多寻回犬",
    "german_shepherd" => "德国牧羊犬",
    "doberman" => "杜宾犬",
    "border_collie" => "边境牧羊犬",
    "shetland_sheepdog" => "喜乐蒂牧羊犬",
    "collie" => "柯利牧羊犬",
    "rottweiler" => "罗威纳犬",
    "boxer" => "拳师犬",
    "great_dane" => "大丹犬",
    "saint_bernard" => "圣伯纳犬",
    "siberian_husky" => "西伯利亚哈士奇",
    "alaskan_malamute" => "阿拉斯加雪橇犬",
    "samoyed" => "萨摩耶",
    "pomeranian" => "博美犬",
    "chow" => "松狮犬",
    "pembroke" => "柯基犬",
    "toy_poodle" => "玩具贵宾犬",
    "miniature_poodle" => "迷你贵宾犬",
    "standard_poodle" => "标准贵宾犬",
    "pug" => "巴哥犬",
    "french_bulldog" => "法国斗牛犬",
    "english_bulldog" => "英国斗牛犬",
    "bernese_mountain_dog" => "伯恩山犬",
    "dalmatian" => "斑点狗",
    "shiba_inu" => "柴犬",
    "akita" => "秋田犬",
    "dingo" => "澳洲野犬",
    "persian" => "波斯猫",
    "siamese" => "暹罗猫",
    "ragdoll" => "布偶猫",
    "maine_coon" => "缅因猫",
    "british_shorthair" => "英国短毛猫",
    "russian_blue" => "俄罗斯蓝猫",
    "sphynx" => "斯芬克斯猫",
    "bengal" => "孟加拉猫",
};

/// 显示名表
///
/// 查找顺序: 覆盖表 → 内置表 (若启用) → 原样返回
#[derive(Clone, Debug, Default)]
pub struct LabelMap {
    overrides: HashMap<String, String>,
    builtin: bool,
}

impl LabelMap {
    /// 恒等映射
    pub fn identity() -> Self {
        Self::default()
    }

    /// 启用内置表
    pub fn builtin() -> Self {
        Self {
            overrides: HashMap::new(),
            builtin: true,
        }
    }

    /// 在内置表之上加载 JSON 覆盖表: `{"golden_retriever": "金毛"}`
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取标签文件失败: {}", path.display()))?;
        let overrides: HashMap<String, String> = serde_json::from_str(&json)
            .with_context(|| format!("标签文件格式错误: {}", path.display()))?;
        log::info!("✅ 已加载 {} 条显示名: {}", overrides.len(), path.display());
        Ok(Self {
            overrides,
            builtin: true,
        })
    }

    pub fn insert(&mut self, native: impl Into<String>, display: impl Into<String>) {
        self.overrides.insert(native.into(), display.into());
    }

    pub fn len(&self) -> usize {
        self.overrides.len() + if self.builtin { BUILTIN.len() } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 原生类别名 → 显示名,查不到时原样返回
    pub fn translate(&self, native: &str) -> String {
        if let Some(display) = self.overrides.get(native) {
            return display.clone();
        }
        if self.builtin {
            let key = native.trim().to_lowercase().replace(' ', "_");
            if let Some(display) = BUILTIN.get(key.as_str()) {
                return (*display).to_string();
            }
        }
        native.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_total() {
        let map = LabelMap::identity();
        assert!(map.is_empty());
        for name in ["", "golden_retriever", "未知", "class7"] {
            assert_eq!(map.translate(name), name);
        }
    }

    #[test]
    fn test_builtin_normalizes_case_and_spaces() {
        let map = LabelMap::builtin();
        assert_eq!(map.translate("golden_retriever"), "金毛寻回犬");
        assert_eq!(map.translate("Golden Retriever"), "金毛寻回犬");
        assert_eq!(map.translate("not_a_breed"), "not_a_breed");
    }

    #[test]
    fn test_overrides_win() {
        let mut map = LabelMap::builtin();
        map.insert("pug", "哈巴狗");
        assert_eq!(map.translate("pug"), "哈巴狗");
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        fs::write(&path, r#"{"class0": "柯基", "beagle": "小猎犬"}"#).unwrap();
        let map = LabelMap::from_json_file(&path).unwrap();
        assert_eq!(map.translate("class0"), "柯基");
        assert_eq!(map.translate("beagle"), "小猎犬");
        assert_eq!(map.translate("samoyed"), "萨摩耶");

        fs::write(&path, "not json").unwrap();
        assert!(LabelMap::from_json_file(&path).is_err());
    }
}
