//! # Diff 模块
//!
//! 最小编辑距离的数组差分，供执行栈热更新时平移程序计数器使用。
//!
//! ## 契约
//!
//! - 只看 `Kept` 与 `Removed` 时，序列与 `a` 一致
//! - 只看 `Kept` 与 `Inserted` 时，序列与 `b` 一致
//! - 同一替换段内 `Removed` 先于 `Inserted` 出现

/// 差分条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    /// 两侧都存在
    Kept {
        value: T,
        index_a: usize,
        index_b: usize,
    },
    /// 仅存在于 `b`
    Inserted { value: T, index_b: usize },
    /// 仅存在于 `a`
    Removed { value: T, index_a: usize },
}

impl<T> Change<T> {
    /// 是否为保留项
    pub fn is_kept(&self) -> bool {
        matches!(self, Change::Kept { .. })
    }
}

/// 使用结构相等比较的差分
pub fn diff<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<Change<T>> {
    diff_by(a, b, |x, y| x == y)
}

/// 使用自定义相等函数的差分
///
/// 动态规划求最长公共子序列后回溯。输入是脚本块级别的节点列表，
/// 规模很小，O(n·m) 的表完全够用。
pub fn diff_by<T, F>(a: &[T], b: &[T], eq: F) -> Vec<Change<T>>
where
    T: Clone,
    F: Fn(&T, &T) -> bool,
{
    let n = a.len();
    let m = b.len();

    // lcs[i][j] = a[i..] 与 b[j..] 的最长公共子序列长度
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if eq(&a[i], &b[j]) {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    // 自前向后回溯，天然得到 Removed 先于 Inserted 的顺序
    let mut changes = Vec::with_capacity(n.max(m));
    let mut i = 0;
    let mut j = 0;
    while i < n && j < m {
        if eq(&a[i], &b[j]) {
            changes.push(Change::Kept {
                value: a[i].clone(),
                index_a: i,
                index_b: j,
            });
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            changes.push(Change::Removed {
                value: a[i].clone(),
                index_a: i,
            });
            i += 1;
        } else {
            changes.push(Change::Inserted {
                value: b[j].clone(),
                index_b: j,
            });
            j += 1;
        }
    }
    while i < n {
        changes.push(Change::Removed {
            value: a[i].clone(),
            index_a: i,
        });
        i += 1;
    }
    while j < m {
        changes.push(Change::Inserted {
            value: b[j].clone(),
            index_b: j,
        });
        j += 1;
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按差分重放出目标序列，用于验证差分定律
    fn apply(changes: &[Change<char>]) -> Vec<char> {
        changes
            .iter()
            .filter_map(|c| match c {
                Change::Kept { value, .. } | Change::Inserted { value, .. } => Some(*value),
                Change::Removed { .. } => None,
            })
            .collect()
    }

    fn restrict_to_a(changes: &[Change<char>]) -> Vec<char> {
        changes
            .iter()
            .filter_map(|c| match c {
                Change::Kept { value, .. } | Change::Removed { value, .. } => Some(*value),
                Change::Inserted { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_identical_inputs_only_kept() {
        let a: Vec<char> = "abc".chars().collect();
        let changes = diff(&a, &a);
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.is_kept()));
    }

    #[test]
    fn test_insert_in_middle() {
        let a: Vec<char> = "ac".chars().collect();
        let b: Vec<char> = "abc".chars().collect();
        let changes = diff(&a, &b);

        assert_eq!(
            changes,
            vec![
                Change::Kept { value: 'a', index_a: 0, index_b: 0 },
                Change::Inserted { value: 'b', index_b: 1 },
                Change::Kept { value: 'c', index_a: 1, index_b: 2 },
            ]
        );
    }

    #[test]
    fn test_remove_in_middle() {
        let a: Vec<char> = "abc".chars().collect();
        let b: Vec<char> = "ac".chars().collect();
        let changes = diff(&a, &b);

        assert_eq!(
            changes,
            vec![
                Change::Kept { value: 'a', index_a: 0, index_b: 0 },
                Change::Removed { value: 'b', index_a: 1 },
                Change::Kept { value: 'c', index_a: 2, index_b: 1 },
            ]
        );
    }

    #[test]
    fn test_replace_emits_removed_before_inserted() {
        let a: Vec<char> = "axc".chars().collect();
        let b: Vec<char> = "ayc".chars().collect();
        let changes = diff(&a, &b);

        assert_eq!(
            changes,
            vec![
                Change::Kept { value: 'a', index_a: 0, index_b: 0 },
                Change::Removed { value: 'x', index_a: 1 },
                Change::Inserted { value: 'y', index_b: 1 },
                Change::Kept { value: 'c', index_a: 2, index_b: 2 },
            ]
        );
    }

    #[test]
    fn test_empty_sides() {
        let empty: Vec<char> = vec![];
        let b: Vec<char> = "ab".chars().collect();

        let changes = diff(&empty, &b);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| matches!(c, Change::Inserted { .. })));

        let changes = diff(&b, &empty);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| matches!(c, Change::Removed { .. })));

        assert!(diff(&empty, &empty).is_empty());
    }

    #[test]
    fn test_apply_law() {
        let cases = [
            ("", ""),
            ("abc", "abc"),
            ("abc", ""),
            ("", "abc"),
            ("abc", "abxyc"),
            ("abcdef", "axcyez"),
            ("aaaa", "aa"),
            ("xabc", "abcy"),
        ];

        for (a, b) in cases {
            let av: Vec<char> = a.chars().collect();
            let bv: Vec<char> = b.chars().collect();
            let changes = diff(&av, &bv);

            // apply(diff(a, b)) == b
            assert_eq!(apply(&changes), bv, "apply 定律失败: {:?} -> {:?}", a, b);
            // 限制在 Kept ∪ Removed 上保持 a
            assert_eq!(restrict_to_a(&changes), av, "a 侧投影失败: {:?} -> {:?}", a, b);
        }
    }

    #[test]
    fn test_custom_equality() {
        let a = ["A".to_string(), "b".to_string()];
        let b = ["a".to_string(), "B".to_string()];
        let changes = diff_by(&a, &b, |x, y| x.eq_ignore_ascii_case(y));
        assert!(changes.iter().all(|c| c.is_kept()));
    }
}
