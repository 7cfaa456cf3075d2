use crate::resources::HandleId;
use rustc_hash::FxHashMap;

/// Cost accounting for the resident set.
///
/// `current` is always the sum of the recorded charges; a handle is charged
/// at most once.
#[derive(Debug)]
pub struct CostBudget {
    max_cost: u64,
    current: u64,
    charges: FxHashMap<HandleId, u64>,
}

impl CostBudget {
    pub fn new(max_cost: u64) -> Self {
        Self {
            max_cost,
            current: 0,
            charges: FxHashMap::default(),
        }
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    pub fn set_max_cost(&mut self, max_cost: u64) {
        self.max_cost = max_cost;
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Cost `id` would add on top of the current total if charged `cost`
    pub fn projected(&self, id: HandleId, cost: u64) -> u64 {
        self.current - self.charge_of(id) + cost
    }

    /// Charge `cost` to `id`, replacing any earlier charge
    pub fn charge(&mut self, id: HandleId, cost: u64) {
        if let Some(previous) = self.charges.insert(id, cost) {
            self.current -= previous;
        }
        self.current += cost;
    }

    /// Remove the charge of `id`, returning what it was charged
    pub fn discharge(&mut self, id: HandleId) -> Option<u64> {
        let cost = self.charges.remove(&id)?;
        self.current = match self.current.checked_sub(cost) {
            Some(current) => current,
            None => panic!(
                "cost underflow: discharging {cost} from {} for {id}",
                self.current
            ),
        };
        Some(cost)
    }

    pub fn charge_of(&self, id: HandleId) -> u64 {
        self.charges.get(&id).copied().unwrap_or(0)
    }

    pub fn is_charged(&self, id: HandleId) -> bool {
        self.charges.contains_key(&id)
    }

    pub fn over_budget(&self) -> bool {
        self.current > self.max_cost
    }

    /// Fraction of the budget in use
    pub fn utilization(&self) -> f32 {
        if self.max_cost == 0 {
            return if self.current == 0 { 0.0 } else { 1.0 };
        }
        self.current as f32 / self.max_cost as f32
    }

    pub fn clear(&mut self) {
        self.current = 0;
        self.charges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_discharge() {
        let mut budget = CostBudget::new(10);
        let a = HandleId::next();
        let b = HandleId::next();

        budget.charge(a, 4);
        budget.charge(b, 3);
        assert_eq!(budget.current(), 7);
        assert_eq!(budget.charge_of(a), 4);

        assert_eq!(budget.discharge(a), Some(4));
        assert_eq!(budget.current(), 3);
        assert_eq!(budget.discharge(a), None);
    }

    #[test]
    fn test_recharge_replaces_previous_cost() {
        let mut budget = CostBudget::new(10);
        let a = HandleId::next();
        budget.charge(a, 1);
        budget.charge(a, 6);
        assert_eq!(budget.current(), 6);
        assert_eq!(budget.projected(a, 2), 2);
    }

    #[test]
    fn test_over_budget_and_utilization() {
        let mut budget = CostBudget::new(4);
        budget.charge(HandleId::next(), 3);
        assert!(!budget.over_budget());
        assert!((budget.utilization() - 0.75).abs() < 0.01);

        budget.set_max_cost(2);
        assert!(budget.over_budget());
    }
}
